//! Batch ingestion for Chorda
//!
//! A batch carries raw points for a single instrument. Points are validated
//! against the catalog and the tuple rules, partitioned into accepted and
//! rejected, and the accepted subset is applied atomically: with persistence
//! enabled every accepted record hits the AOF before any of them lands in
//! memory.

use crate::db::DB;
use crate::error::{ChordaError, Result};
use crate::types::Measurement;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// An unvalidated point as received from a sensor feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub variable: String,
    pub timestamp_ms: i64,
    pub value: f64,
}

impl RawPoint {
    pub fn new(variable: impl Into<String>, timestamp_ms: i64, value: f64) -> Self {
        Self {
            variable: variable.into(),
            timestamp_ms,
            value,
        }
    }
}

/// A batch of raw points destined for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatch {
    pub instrument_id: u32,
    pub points: Vec<RawPoint>,
}

impl IngestBatch {
    pub fn new(instrument_id: u32) -> Self {
        Self {
            instrument_id,
            points: Vec::new(),
        }
    }

    pub fn with_point(mut self, point: RawPoint) -> Self {
        self.points.push(point);
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Why an individual point was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum RejectReason {
    /// The variable shortname is not registered for the instrument.
    UnknownVariable(String),
    /// The tuple itself is malformed (non-finite value, pre-epoch timestamp).
    InvalidPoint(String),
}

/// One rejected point, identified by its index within the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedPoint {
    pub index: usize,
    pub variable: String,
    pub reason: RejectReason,
}

/// Itemized outcome of a batch ingest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedPoint>,
}

impl IngestReport {
    pub fn all_accepted(&self) -> bool {
        self.rejected.is_empty()
    }
}

impl DB {
    /// Ingest a batch of points for one instrument.
    ///
    /// The whole batch fails with `NoSuchInstrument` when the instrument is
    /// unregistered. Otherwise each point is judged independently: invalid
    /// or unknown-variable points are itemized in the report, valid points
    /// are applied as a unit under a single write lock so no query observes
    /// a partially applied batch.
    pub fn ingest(&self, batch: &IngestBatch) -> Result<IngestReport> {
        let mut inner = self.write_checked()?;
        inner.catalog.get(batch.instrument_id)?;

        let mut report = IngestReport::default();
        let mut staged: SmallVec<[Measurement; 16]> = SmallVec::new();

        for (index, point) in batch.points.iter().enumerate() {
            if inner
                .catalog
                .get_variable(batch.instrument_id, &point.variable)
                .is_err()
            {
                report.rejected.push(RejectedPoint {
                    index,
                    variable: point.variable.clone(),
                    reason: RejectReason::UnknownVariable(point.variable.clone()),
                });
                continue;
            }

            let m = Measurement::new(
                batch.instrument_id,
                point.variable.as_str(),
                point.timestamp_ms,
                point.value,
            );
            if let Err(e) = m.validate() {
                let detail = match e {
                    ChordaError::InvalidPoint { reason } => reason,
                    other => other.to_string(),
                };
                report.rejected.push(RejectedPoint {
                    index,
                    variable: point.variable.clone(),
                    reason: RejectReason::InvalidPoint(detail),
                });
                continue;
            }

            staged.push(m);
        }

        // Durability first: the whole accepted subset reaches the AOF
        // before any point is visible in memory.
        inner.write_batch_to_aof(&staged)?;

        for m in &staged {
            inner.apply_append(m)?;
        }
        report.accepted = staged.len();
        inner.stats.record_operation();

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Instrument, Variable};

    fn test_db() -> DB {
        let db = DB::memory().unwrap();
        db.register_instrument(
            Instrument::new(1, "met station")
                .with_variable(Variable::new("temp").unwrap())
                .with_variable(Variable::new("rh").unwrap()),
        )
        .unwrap();
        db
    }

    #[test]
    fn test_partial_acceptance_is_itemized() {
        let db = test_db();

        let batch = IngestBatch::new(1)
            .with_point(RawPoint::new("temp", 1_000, 21.5))
            .with_point(RawPoint::new("pressure", 1_000, 1013.0));
        let report = db.ingest(&batch).unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 1);
        assert!(matches!(
            report.rejected[0].reason,
            RejectReason::UnknownVariable(_)
        ));

        let points = db.range_query(1, "temp", 0, i64::MAX, None).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_invalid_points_rejected_not_fatal() {
        let db = test_db();

        let batch = IngestBatch::new(1)
            .with_point(RawPoint::new("temp", 1_000, f64::NAN))
            .with_point(RawPoint::new("temp", -1, 1.0))
            .with_point(RawPoint::new("temp", 2_000, 22.0));
        let report = db.ingest(&batch).unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 2);
        assert!(report
            .rejected
            .iter()
            .all(|r| matches!(r.reason, RejectReason::InvalidPoint(_))));
    }

    #[test]
    fn test_unknown_instrument_fails_whole_batch() {
        let db = test_db();

        let batch = IngestBatch::new(42).with_point(RawPoint::new("temp", 1_000, 21.5));
        let err = db.ingest(&batch).unwrap_err();
        assert!(matches!(err, ChordaError::NoSuchInstrument(42)));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let db = test_db();
        let report = db.ingest(&IngestBatch::new(1)).unwrap();
        assert_eq!(report.accepted, 0);
        assert!(report.all_accepted());
    }

    #[test]
    fn test_report_roundtrips_as_json() {
        let report = IngestReport {
            accepted: 3,
            rejected: vec![RejectedPoint {
                index: 4,
                variable: "rh".into(),
                reason: RejectReason::InvalidPoint("value is not finite".into()),
            }],
        };

        let json = serde_json::to_string(&report).unwrap();
        let back: IngestReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.accepted, 3);
        assert_eq!(back.rejected, report.rejected);
    }
}
