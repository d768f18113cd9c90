//! Point store for Chorda
//!
//! Append-only, time-ordered storage of measurement tuples. Each
//! `(instrument, variable)` pair owns a series kept in a B-tree keyed by
//! timestamp, so range and tail scans come out in ascending order for free.

use crate::error::{ChordaError, Result};
use crate::types::Measurement;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Instant;

/// How many scanned points between deadline checks.
const DEADLINE_CHECK_INTERVAL: usize = 1024;

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    if let Some(deadline) = deadline
        && Instant::now() >= deadline
    {
        return Err(ChordaError::DeadlineExceeded);
    }
    Ok(())
}

/// One time series: timestamp (ms) -> value.
///
/// The timestamp is the unique key within a series, so a duplicate write is
/// an in-place overwrite and ordering is always non-decreasing on scan.
#[derive(Debug, Default)]
struct Series {
    points: BTreeMap<i64, f64>,
}

/// In-memory point store, one ordered series per (instrument, variable).
#[derive(Debug, Default)]
pub struct PointStore {
    series: FxHashMap<u32, FxHashMap<String, Series>>,
    point_count: usize,
    series_count: usize,
}

impl PointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a measurement. Returns the overwritten value, if any.
    ///
    /// Fails with `InvalidPoint` for non-finite values or pre-epoch
    /// timestamps; the store never holds a partial tuple.
    pub fn append(&mut self, m: &Measurement) -> Result<Option<f64>> {
        m.validate()?;

        let by_variable = self.series.entry(m.instrument_id).or_default();
        let series = match by_variable.get_mut(m.variable.as_str()) {
            Some(series) => series,
            None => {
                self.series_count += 1;
                by_variable.entry(m.variable.clone()).or_default()
            }
        };

        let old = series.points.insert(m.timestamp_ms, m.value);
        if old.is_none() {
            self.point_count += 1;
        }
        Ok(old)
    }

    fn get_series(&self, instrument_id: u32, variable: &str) -> Option<&Series> {
        self.series.get(&instrument_id)?.get(variable)
    }

    /// Points with `start <= timestamp <= end`, ascending. An empty or
    /// inverted window yields an empty sequence, never an error.
    pub fn range(
        &self,
        instrument_id: u32,
        variable: &str,
        start: i64,
        end: i64,
        deadline: Option<Instant>,
    ) -> Result<Vec<Measurement>> {
        check_deadline(deadline)?;

        let Some(series) = self.get_series(instrument_id, variable) else {
            return Ok(Vec::new());
        };
        if start > end {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for (scanned, (&ts, &value)) in series.points.range(start..=end).enumerate() {
            if scanned % DEADLINE_CHECK_INTERVAL == 0 {
                check_deadline(deadline)?;
            }
            out.push(Measurement::new(instrument_id, variable, ts, value));
        }
        Ok(out)
    }

    /// Up to `limit` points strictly after `after`, ascending.
    pub fn tail(
        &self,
        instrument_id: u32,
        variable: &str,
        after: i64,
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<Measurement>> {
        check_deadline(deadline)?;

        let Some(series) = self.get_series(instrument_id, variable) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(limit.min(64));
        let range = series
            .points
            .range((Bound::Excluded(after), Bound::Unbounded));
        for (scanned, (&ts, &value)) in range.take(limit).enumerate() {
            if scanned % DEADLINE_CHECK_INTERVAL == 0 {
                check_deadline(deadline)?;
            }
            out.push(Measurement::new(instrument_id, variable, ts, value));
        }
        Ok(out)
    }

    /// The most recent point of a series, if any.
    pub fn last(&self, instrument_id: u32, variable: &str) -> Option<Measurement> {
        let series = self.get_series(instrument_id, variable)?;
        series
            .points
            .last_key_value()
            .map(|(&ts, &value)| Measurement::new(instrument_id, variable, ts, value))
    }

    /// The most recent `n` points of a series, ascending.
    pub fn last_n(&self, instrument_id: u32, variable: &str, n: usize) -> Vec<Measurement> {
        let Some(series) = self.get_series(instrument_id, variable) else {
            return Vec::new();
        };

        let mut out: Vec<Measurement> = series
            .points
            .iter()
            .rev()
            .take(n)
            .map(|(&ts, &value)| Measurement::new(instrument_id, variable, ts, value))
            .collect();
        out.reverse();
        out
    }

    /// Remove up to `max_points` points with `timestamp < cutoff_ms` across
    /// all series. Returns the number removed; callers loop until a batch
    /// comes back short of the cap. Series emptied by the sweep are dropped
    /// so fully pruned variables do not pin map entries forever.
    pub fn prune_older_than(&mut self, cutoff_ms: i64, max_points: usize) -> usize {
        if max_points == 0 {
            return 0;
        }

        let mut removed = 0;
        'outer: for by_variable in self.series.values_mut() {
            for series in by_variable.values_mut() {
                let expired: Vec<i64> = series
                    .points
                    .range(..cutoff_ms)
                    .map(|(&ts, _)| ts)
                    .take(max_points - removed)
                    .collect();

                for ts in expired {
                    series.points.remove(&ts);
                    removed += 1;
                }

                if removed >= max_points {
                    break 'outer;
                }
            }
        }

        if removed > 0 {
            self.drop_empty_series();
        }
        self.point_count -= removed;
        removed
    }

    fn drop_empty_series(&mut self) {
        let mut dropped = 0;
        for by_variable in self.series.values_mut() {
            by_variable.retain(|_, series| {
                let keep = !series.points.is_empty();
                if !keep {
                    dropped += 1;
                }
                keep
            });
        }
        self.series.retain(|_, by_variable| !by_variable.is_empty());
        self.series_count -= dropped;
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn series_count(&self) -> usize {
        self.series_count
    }

    /// Iterate over every stored point, grouped by series.
    pub fn iter_points(&self) -> impl Iterator<Item = Measurement> + '_ {
        self.series.iter().flat_map(|(&instrument_id, by_var)| {
            by_var.iter().flat_map(move |(variable, series)| {
                series
                    .points
                    .iter()
                    .map(move |(&ts, &value)| Measurement::new(instrument_id, variable, ts, value))
            })
        })
    }
}
