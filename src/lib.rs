//! # Chorda
//!
//! An embedded time-series engine for streaming sensor data, built for
//! real-time geoscience deployments: many instruments reporting measurements
//! at regular cadence, dashboards polling for fresh points, and bounded
//! retention keeping the store small.
//!
//! ## Features
//!
//! - **Validated ingestion**: batches are checked against an instrument
//!   catalog; bad points are itemized, good points land atomically
//! - **Ordered queries**: inclusive range scans, watermark tails, latest
//!   point, and deterministic multi-variable fan-out, all deadline-aware
//! - **Retention**: age-based pruning in bounded batches, optionally on a
//!   background thread
//! - **Live feed**: stateless polling with client-held watermarks and
//!   per-variable display caps
//! - **Persistence**: optional append-only file with startup replay and
//!   size-triggered compaction (`aof` feature, on by default)
//!
//! ## Quick Start
//!
//! ```rust
//! use chorda::{Chorda, Instrument, Variable, IngestBatch, RawPoint};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Chorda::memory()?;
//! db.register_instrument(
//!     Instrument::new(1, "met station")
//!         .with_variable(Variable::new("temp")?.with_units("degC")),
//! )?;
//!
//! let batch = IngestBatch::new(1)
//!     .with_point(RawPoint::new("temp", 1_000, 21.5))
//!     .with_point(RawPoint::new("temp", 2_000, 21.7));
//! let report = db.ingest(&batch)?;
//! assert_eq!(report.accepted, 2);
//!
//! let points = db.range_query(1, "temp", 0, i64::MAX, None)?;
//! assert_eq!(points.len(), 2);
//!
//! let update = db.live_poll(1, "temp", None)?;
//! assert_eq!(update.watermark, Some(2_000));
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod catalog;
pub mod db;
pub mod error;
pub mod ingest;
pub mod live;
#[cfg(feature = "aof")]
pub mod persistence;
pub mod query;
pub mod retention;
pub mod store;
pub mod types;

pub use builder::DBBuilder;
pub use catalog::{Catalog, Instrument, Shortname, Variable};
pub use db::DB;
pub use error::{ChordaError, Result};
pub use ingest::{IngestBatch, IngestReport, RawPoint, RejectReason, RejectedPoint};
pub use live::{LiveUpdate, LiveWindow, TimeUnits};
pub use query::{QueryParams, QueryResult};
pub use retention::RetentionManager;
pub use types::{Config, DbStats, Measurement, SyncMode, SyncPolicy, unix_ms, unix_ms_now};

/// Convenience alias for the engine handle.
pub type Chorda = DB;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::{
        Chorda, ChordaError, Config, DB, IngestBatch, Instrument, LiveWindow, Measurement,
        QueryParams, QueryResult, RawPoint, Result, RetentionManager, SyncPolicy, Variable,
    };
}
