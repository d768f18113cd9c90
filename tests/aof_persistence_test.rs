//! Persistence tests: AOF replay across reopen, prune records, compaction,
//! and sync policies.

use chorda::{
    Chorda, Config, IngestBatch, Instrument, Measurement, RawPoint, SyncMode, SyncPolicy, Variable,
};
use std::path::Path;

fn register_buoy(db: &Chorda) {
    db.register_instrument(
        Instrument::new(1, "buoy")
            .with_variable(Variable::new("sst").unwrap())
            .with_variable(Variable::new("salinity").unwrap()),
    )
    .unwrap();
}

fn reopen(path: &Path) -> Chorda {
    let db = Chorda::open(path).unwrap();
    register_buoy(&db);
    db
}

#[test]
fn test_points_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buoy.aof");

    {
        let db = Chorda::open(&path).unwrap();
        register_buoy(&db);
        db.ingest(
            &IngestBatch::new(1)
                .with_point(RawPoint::new("sst", 1_000, 15.0))
                .with_point(RawPoint::new("sst", 2_000, 15.2))
                .with_point(RawPoint::new("salinity", 1_000, 35.0)),
        )
        .unwrap();
        db.close().unwrap();
    }

    let db = reopen(&path);
    let stats = db.stats().unwrap();
    assert_eq!(stats.point_count, 3);
    assert_eq!(stats.series_count, 2);

    let points = db.range_query(1, "sst", 0, i64::MAX, None).unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].value, 15.0);
    assert_eq!(points[1].value, 15.2);
}

#[test]
fn test_overwrites_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buoy.aof");

    {
        let db = Chorda::open(&path).unwrap();
        register_buoy(&db);
        db.append(Measurement::new(1, "sst", 1_000, 1.0)).unwrap();
        db.append(Measurement::new(1, "sst", 1_000, 2.0)).unwrap();
        db.close().unwrap();
    }

    let db = reopen(&path);
    let points = db.range_query(1, "sst", 0, i64::MAX, None).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 2.0);
}

#[test]
fn test_prune_record_replays() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buoy.aof");

    {
        let db = Chorda::open(&path).unwrap();
        register_buoy(&db);
        for ts in [100, 200, 300] {
            db.append(Measurement::new(1, "sst", ts, 1.0)).unwrap();
        }
        assert_eq!(db.prune_older_than(250).unwrap(), 2);
        db.close().unwrap();
    }

    let db = reopen(&path);
    let points = db.range_query(1, "sst", 0, i64::MAX, None).unwrap();
    let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp_ms).collect();
    assert_eq!(timestamps, vec![300]);
}

#[test]
fn test_points_after_prune_survive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buoy.aof");

    {
        let db = Chorda::open(&path).unwrap();
        register_buoy(&db);
        db.append(Measurement::new(1, "sst", 100, 1.0)).unwrap();
        db.prune_older_than(1_000).unwrap();
        // Pre-cutoff timestamp written after the prune is still data.
        db.append(Measurement::new(1, "sst", 500, 2.0)).unwrap();
        db.close().unwrap();
    }

    let db = reopen(&path);
    let points = db.range_query(1, "sst", 0, i64::MAX, None).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].timestamp_ms, 500);
    assert_eq!(points[0].value, 2.0);
}

#[test]
fn test_drop_without_close_still_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buoy.aof");

    {
        let db = Chorda::open(&path).unwrap();
        register_buoy(&db);
        db.append(Measurement::new(1, "sst", 1_000, 15.0)).unwrap();
        // Dropped without close(): the handle syncs best-effort.
    }

    let db = reopen(&path);
    assert_eq!(db.stats().unwrap().point_count, 1);
}

#[test]
fn test_sync_policies_roundtrip() {
    for policy in [SyncPolicy::Never, SyncPolicy::EverySecond, SyncPolicy::Always] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buoy.aof");
        let config = Config::default()
            .with_sync_policy(policy)
            .with_sync_mode(SyncMode::Data);

        {
            let db = Chorda::open_with_config(&path, config.clone()).unwrap();
            register_buoy(&db);
            db.append(Measurement::new(1, "sst", 1_000, 15.0)).unwrap();
            db.sync().unwrap();
            db.close().unwrap();
        }

        let db = Chorda::open_with_config(&path, config).unwrap();
        register_buoy(&db);
        assert_eq!(db.stats().unwrap().point_count, 1, "policy {:?}", policy);
    }
}

#[test]
fn test_replay_tolerates_unregistered_instruments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buoy.aof");

    {
        let db = Chorda::open(&path).unwrap();
        register_buoy(&db);
        db.append(Measurement::new(1, "sst", 1_000, 15.0)).unwrap();
        db.close().unwrap();
    }

    // Reopen without registering anything: data loads, catalog is empty.
    let db = Chorda::open(&path).unwrap();
    let stats = db.stats().unwrap();
    assert_eq!(stats.point_count, 1);
    assert_eq!(stats.instrument_count, 0);

    // Queries need the catalog entry back.
    assert!(db.range_query(1, "sst", 0, i64::MAX, None).is_err());
    register_buoy(&db);
    assert_eq!(db.range_query(1, "sst", 0, i64::MAX, None).unwrap().len(), 1);
}

#[test]
fn test_memory_and_replay_agree_under_concurrent_prune() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buoy.aof");

    let live_count = {
        let db = Chorda::open(&path).unwrap();
        register_buoy(&db);

        // Pre-cutoff appends race the prunes; whichever side of a prune an
        // append lands on, memory and the AOF must agree on its fate.
        let writer = {
            let db = db.clone();
            std::thread::spawn(move || {
                for ts in 0..200 {
                    db.append(Measurement::new(1, "sst", ts, 1.0)).unwrap();
                }
            })
        };
        let pruner = {
            let db = db.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    db.prune_older_than(1_000_000).unwrap();
                }
            })
        };
        writer.join().unwrap();
        pruner.join().unwrap();

        let count = db.stats().unwrap().point_count;
        db.close().unwrap();
        count
    };

    let db = Chorda::open(&path).unwrap();
    assert_eq!(db.stats().unwrap().point_count, live_count);
}

#[test]
fn test_many_points_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buoy.aof");

    {
        let db = Chorda::open(&path).unwrap();
        register_buoy(&db);
        let mut batch = IngestBatch::new(1);
        for i in 0..1_000 {
            batch = batch.with_point(RawPoint::new("sst", i * 1_000, (i % 40) as f64));
        }
        let report = db.ingest(&batch).unwrap();
        assert_eq!(report.accepted, 1_000);
        db.close().unwrap();
    }

    let db = reopen(&path);
    assert_eq!(db.stats().unwrap().point_count, 1_000);

    let tail = db.tail_query(1, "sst", 995_000, 100, None).unwrap();
    assert_eq!(tail.len(), 4);
}
