//! Age-based retention for Chorda
//!
//! Points older than the configured retention window are pruned in bounded
//! batches so the write lock is never held for a store-wide sweep. A
//! `RetentionManager` runs the pruning on a background thread; callers can
//! also invoke `DB::prune_expired` directly.

use crate::db::DB;
use crate::error::Result;
use crate::types::unix_ms_now;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Granularity of shutdown checks while the pruner sleeps.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl DB {
    /// Prune every point older than the retention window, in bounded batches.
    ///
    /// Returns the number of points removed. A `None` retention means keep
    /// forever, so this is a no-op. The lock is released between batches to
    /// let readers and writers interleave with a large prune.
    pub fn prune_expired(&self) -> Result<usize> {
        let retention = {
            let inner = self.read_checked()?;
            inner.config.retention()
        };
        let Some(retention) = retention else {
            return Ok(0);
        };

        let now_ms = unix_ms_now()?;
        let cutoff_ms = now_ms.saturating_sub(retention.as_millis() as i64);
        self.prune_older_than(cutoff_ms)
    }

    /// Prune every point with `timestamp < cutoff_ms`.
    ///
    /// With persistence on, the Prune record and the whole sweep run under a
    /// single write-lock epoch: no append can slot between the record and a
    /// sweep batch, so a replayed file always reproduces the live state.
    /// Memory-only engines sweep in bounded batches with the lock released
    /// between rounds, letting readers and writers interleave.
    pub fn prune_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        // batch size 0 means sweep in a single pass
        let batch_size = {
            let inner = self.read_checked()?;
            match inner.config.prune_batch_size {
                0 => usize::MAX,
                n => n,
            }
        };

        {
            let mut inner = self.write_checked()?;
            if inner.aof_enabled() {
                inner.write_prune_to_aof_if_needed(cutoff_ms)?;
                let mut total = 0;
                loop {
                    let removed = inner.store.prune_older_than(cutoff_ms, batch_size);
                    inner.stats.record_pruned(removed as u64);
                    total += removed;
                    if removed < batch_size {
                        inner.refresh_counters();
                        return Ok(total);
                    }
                }
            }
        }

        let mut total = 0;
        loop {
            let removed = {
                let mut inner = self.write_checked()?;
                let removed = inner.store.prune_older_than(cutoff_ms, batch_size);
                inner.refresh_counters();
                inner.stats.record_pruned(removed as u64);
                removed
            };
            total += removed;
            if removed < batch_size {
                break;
            }
        }
        Ok(total)
    }
}

/// Background pruner.
///
/// Owns a thread that calls `DB::prune_expired` on a fixed interval. A prune
/// failure is logged and the loop continues; dropping the manager stops the
/// thread.
pub struct RetentionManager {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl RetentionManager {
    /// Start the pruning loop on a new thread.
    pub fn spawn(db: DB, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("chorda-retention".into())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Relaxed) {
                    if let Err(e) = db.prune_expired() {
                        log::warn!("Retention prune failed: {}", e);
                    }

                    let mut slept = Duration::ZERO;
                    while slept < interval {
                        if thread_shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        let slice = SHUTDOWN_POLL_INTERVAL.min(interval - slept);
                        thread::sleep(slice);
                        slept += slice;
                    }
                }
            })
            .ok();

        Self { handle, shutdown }
    }

    /// Start the pruning loop using the engine's configured interval.
    pub fn spawn_with_config(db: DB) -> Result<Self> {
        let interval = db.config()?.prune_interval();
        Ok(Self::spawn(db, interval))
    }

    /// Signal the thread to stop and wait for it.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RetentionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Instrument, Variable};
    use crate::types::{Config, Measurement};

    fn db_with_retention(retention_seconds: Option<f64>) -> DB {
        let mut config = Config::default();
        config.retention_seconds = retention_seconds;
        config.prune_batch_size = 2;
        let db = DB::memory_with_config(config).unwrap();
        db.register_instrument(
            Instrument::new(1, "met station").with_variable(Variable::new("temp").unwrap()),
        )
        .unwrap();
        db
    }

    #[test]
    fn test_infinite_retention_is_noop() {
        let db = db_with_retention(None);
        db.append(Measurement::new(1, "temp", 100, 1.0)).unwrap();

        assert_eq!(db.prune_expired().unwrap(), 0);
        assert_eq!(db.stats().unwrap().point_count, 1);
    }

    #[test]
    fn test_prune_expired_removes_only_old_points() {
        let db = db_with_retention(Some(3600.0));

        let now_ms = unix_ms_now().unwrap();
        let stale = now_ms - 2 * 3600 * 1000;
        for i in 0..5 {
            db.append(Measurement::new(1, "temp", stale + i, 1.0)).unwrap();
        }
        db.append(Measurement::new(1, "temp", now_ms, 2.0)).unwrap();

        // batch size 2 forces multiple bounded rounds
        let removed = db.prune_expired().unwrap();
        assert_eq!(removed, 5);

        let stats = db.stats().unwrap();
        assert_eq!(stats.point_count, 1);
        assert_eq!(stats.pruned_count, 5);
    }

    #[test]
    fn test_prune_older_than_exact_cutoff() {
        let db = db_with_retention(None);
        for &ts in &[100, 200, 300] {
            db.append(Measurement::new(1, "temp", ts, 1.0)).unwrap();
        }

        // cutoff is exclusive of itself: timestamp == cutoff survives
        assert_eq!(db.prune_older_than(200).unwrap(), 1);
        let remaining = db.range_query(1, "temp", 0, i64::MAX, None).unwrap();
        let timestamps: Vec<i64> = remaining.iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(timestamps, vec![200, 300]);
    }

    #[test]
    fn test_background_manager_prunes() {
        let db = db_with_retention(Some(1.0));

        let now_ms = unix_ms_now().unwrap();
        db.append(Measurement::new(1, "temp", now_ms - 10_000, 1.0))
            .unwrap();
        db.append(Measurement::new(1, "temp", now_ms, 2.0)).unwrap();

        let mut manager = RetentionManager::spawn(db.clone(), Duration::from_millis(20));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while db.stats().unwrap().point_count > 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        manager.stop();

        assert_eq!(db.stats().unwrap().point_count, 1);
    }
}
