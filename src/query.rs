//! Query engine for Chorda
//!
//! Read operations over the point store: inclusive range scans, watermark
//! tails, latest-point lookups, and deterministic multi-variable fan-out.
//! Every operation takes an optional deadline; long scans check it
//! periodically and abort with `DeadlineExceeded` rather than overrun.

use crate::db::DB;
use crate::error::Result;
use crate::types::Measurement;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// A declarative query against one instrument.
///
/// With a `variable` the query targets one series; without one it fans out
/// over every registered variable of the instrument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    pub instrument_id: u32,
    #[serde(default)]
    pub variable: Option<String>,
    /// Inclusive window start (ms). Defaults to the epoch.
    #[serde(default)]
    pub start: Option<i64>,
    /// Inclusive window end (ms). Defaults to no upper bound.
    #[serde(default)]
    pub end: Option<i64>,
    /// Exclusive watermark for tail queries. When set, `start`/`end` are
    /// ignored and up to `limit` points strictly after it are returned.
    #[serde(default)]
    pub after: Option<i64>,
    /// Cap on returned points for tail queries.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryParams {
    pub fn instrument(instrument_id: u32) -> Self {
        Self {
            instrument_id,
            ..Self::default()
        }
    }

    pub fn variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn after(mut self, watermark: i64) -> Self {
        self.after = Some(watermark);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result of a dispatched query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResult {
    /// A single series, ascending by timestamp.
    Series(Vec<Measurement>),
    /// One ascending series per variable shortname, in lexical key order.
    MultiSeries(BTreeMap<String, Vec<Measurement>>),
}

impl QueryResult {
    /// Total number of points across all series.
    pub fn point_count(&self) -> usize {
        match self {
            QueryResult::Series(points) => points.len(),
            QueryResult::MultiSeries(map) => map.values().map(Vec::len).sum(),
        }
    }
}

impl DB {
    /// Points of one series with `start <= timestamp <= end`, ascending.
    ///
    /// The instrument and variable must be registered; an empty or inverted
    /// window yields an empty vector.
    pub fn range_query(
        &self,
        instrument_id: u32,
        variable: &str,
        start: i64,
        end: i64,
        deadline: Option<Instant>,
    ) -> Result<Vec<Measurement>> {
        let inner = self.read_checked()?;
        inner.catalog.get_variable(instrument_id, variable)?;
        inner.store.range(instrument_id, variable, start, end, deadline)
    }

    /// Up to `limit` points strictly after the watermark, ascending.
    pub fn tail_query(
        &self,
        instrument_id: u32,
        variable: &str,
        after: i64,
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<Measurement>> {
        let inner = self.read_checked()?;
        inner.catalog.get_variable(instrument_id, variable)?;
        inner.store.tail(instrument_id, variable, after, limit, deadline)
    }

    /// The most recent point of a series, or `None` for an empty series.
    pub fn last(&self, instrument_id: u32, variable: &str) -> Result<Option<Measurement>> {
        let inner = self.read_checked()?;
        inner.catalog.get_variable(instrument_id, variable)?;
        Ok(inner.store.last(instrument_id, variable))
    }

    /// Range query over every variable of an instrument.
    ///
    /// Variables are visited in lexical shortname order so results are
    /// deterministic; series with no points in the window appear as empty
    /// entries. The deadline covers the whole fan-out.
    pub fn fan_out(
        &self,
        instrument_id: u32,
        start: i64,
        end: i64,
        deadline: Option<Instant>,
    ) -> Result<BTreeMap<String, Vec<Measurement>>> {
        let inner = self.read_checked()?;
        let instrument = inner.catalog.get(instrument_id)?;

        let mut out = BTreeMap::new();
        for shortname in instrument.variable_shortnames() {
            let points = inner
                .store
                .range(instrument_id, &shortname, start, end, deadline)?;
            out.insert(shortname, points);
        }
        Ok(out)
    }

    /// Tail query over every variable of an instrument.
    ///
    /// Like `fan_out`, but each series returns up to `limit` points strictly
    /// after the watermark.
    pub fn fan_out_tail(
        &self,
        instrument_id: u32,
        after: i64,
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<BTreeMap<String, Vec<Measurement>>> {
        let inner = self.read_checked()?;
        let instrument = inner.catalog.get(instrument_id)?;

        let mut out = BTreeMap::new();
        for shortname in instrument.variable_shortnames() {
            let points = inner
                .store
                .tail(instrument_id, &shortname, after, limit, deadline)?;
            out.insert(shortname, points);
        }
        Ok(out)
    }

    /// Dispatch a declarative query.
    ///
    /// `after` selects a tail query, `start`/`end` a range query; either one
    /// fans out over every variable when no variable is named.
    pub fn query(&self, params: &QueryParams, deadline: Option<Instant>) -> Result<QueryResult> {
        let start = params.start.unwrap_or(0);
        let end = params.end.unwrap_or(i64::MAX);
        let limit = params.limit.unwrap_or(usize::MAX);

        match (&params.variable, params.after) {
            (Some(variable), Some(after)) => {
                let points =
                    self.tail_query(params.instrument_id, variable, after, limit, deadline)?;
                Ok(QueryResult::Series(points))
            }
            (Some(variable), None) => {
                let points =
                    self.range_query(params.instrument_id, variable, start, end, deadline)?;
                Ok(QueryResult::Series(points))
            }
            (None, Some(after)) => {
                let map = self.fan_out_tail(params.instrument_id, after, limit, deadline)?;
                Ok(QueryResult::MultiSeries(map))
            }
            (None, None) => {
                let map = self.fan_out(params.instrument_id, start, end, deadline)?;
                Ok(QueryResult::MultiSeries(map))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Instrument, Variable};
    use crate::error::ChordaError;
    use std::time::Duration;

    fn seeded_db() -> DB {
        let db = DB::memory().unwrap();
        db.register_instrument(
            Instrument::new(1, "met station")
                .with_variable(Variable::new("temp").unwrap())
                .with_variable(Variable::new("rh").unwrap()),
        )
        .unwrap();
        for &(ts, value) in &[(100, 1.0), (200, 2.0), (300, 3.0)] {
            db.append(Measurement::new(1, "temp", ts, value)).unwrap();
        }
        db.append(Measurement::new(1, "rh", 150, 55.0)).unwrap();
        db
    }

    #[test]
    fn test_range_query_inclusive_bounds() {
        let db = seeded_db();

        let points = db.range_query(1, "temp", 100, 200, None).unwrap();
        let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(timestamps, vec![100, 200]);

        assert!(db.range_query(1, "temp", 400, 500, None).unwrap().is_empty());
        assert!(db.range_query(1, "temp", 300, 100, None).unwrap().is_empty());
    }

    #[test]
    fn test_unregistered_names_are_errors() {
        let db = seeded_db();

        assert!(matches!(
            db.range_query(9, "temp", 0, 1000, None).unwrap_err(),
            ChordaError::NoSuchInstrument(9)
        ));
        assert!(matches!(
            db.range_query(1, "pressure", 0, 1000, None).unwrap_err(),
            ChordaError::NoSuchVariable { .. }
        ));
        assert!(matches!(
            db.last(1, "pressure").unwrap_err(),
            ChordaError::NoSuchVariable { .. }
        ));
    }

    #[test]
    fn test_tail_query_strictly_after() {
        let db = seeded_db();

        let points = db.tail_query(1, "temp", 100, 10, None).unwrap();
        let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(timestamps, vec![200, 300]);

        assert_eq!(db.tail_query(1, "temp", 0, 1, None).unwrap().len(), 1);
    }

    #[test]
    fn test_last_point() {
        let db = seeded_db();
        let last = db.last(1, "temp").unwrap().unwrap();
        assert_eq!(last.timestamp_ms, 300);
        assert_eq!(last.value, 3.0);
    }

    #[test]
    fn test_fan_out_deterministic_and_complete() {
        let db = seeded_db();

        let map = db.fan_out(1, 0, i64::MAX, None).unwrap();
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, vec!["rh", "temp"]);
        assert_eq!(map["temp"].len(), 3);
        assert_eq!(map["rh"].len(), 1);

        // Window that misses rh still reports it as an empty series.
        let map = db.fan_out(1, 200, 300, None).unwrap();
        assert!(map["rh"].is_empty());
        assert_eq!(map["temp"].len(), 2);
    }

    #[test]
    fn test_query_dispatch() {
        let db = seeded_db();

        let result = db
            .query(&QueryParams::instrument(1).variable("temp").between(100, 200), None)
            .unwrap();
        assert!(matches!(result, QueryResult::Series(ref p) if p.len() == 2));

        let result = db
            .query(
                &QueryParams::instrument(1).variable("temp").after(100).limit(1),
                None,
            )
            .unwrap();
        assert!(matches!(result, QueryResult::Series(ref p) if p.len() == 1));

        let result = db.query(&QueryParams::instrument(1), None).unwrap();
        assert_eq!(result.point_count(), 4);
        assert!(matches!(result, QueryResult::MultiSeries(_)));
    }

    #[test]
    fn test_query_tail_without_variable_fans_out() {
        let db = seeded_db();

        let result = db
            .query(&QueryParams::instrument(1).after(100).limit(1), None)
            .unwrap();
        let QueryResult::MultiSeries(map) = result else {
            panic!("expected a fan-out result");
        };

        // One point per series, each strictly after the watermark
        assert_eq!(map["temp"].len(), 1);
        assert_eq!(map["temp"][0].timestamp_ms, 200);
        assert_eq!(map["rh"].len(), 1);
        assert_eq!(map["rh"][0].timestamp_ms, 150);

        // Watermark past all data: empty series, limit honored
        let result = db
            .query(&QueryParams::instrument(1).after(1_000), None)
            .unwrap();
        assert_eq!(result.point_count(), 0);
    }

    #[test]
    fn test_expired_deadline_fails_fast() {
        let db = seeded_db();
        let past = Instant::now() - Duration::from_millis(1);

        assert!(matches!(
            db.range_query(1, "temp", 0, i64::MAX, Some(past)).unwrap_err(),
            ChordaError::DeadlineExceeded
        ));
        assert!(matches!(
            db.fan_out(1, 0, i64::MAX, Some(past)).unwrap_err(),
            ChordaError::DeadlineExceeded
        ));
    }
}
