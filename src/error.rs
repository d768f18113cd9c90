//! Error types for Chorda.

use std::time::Duration;
use thiserror::Error;

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChordaError>;

/// All errors surfaced by the engine.
///
/// The taxonomy distinguishes client errors (`InvalidPoint`, `UnknownVariable`,
/// `NoSuchInstrument`, `NoSuchVariable`), transient conditions eligible for
/// caller-side retry (`StoreUnavailable`, `DeadlineExceeded`), and internal
/// storage failures.
#[derive(Debug, Error)]
pub enum ChordaError {
    /// Malformed measurement: missing/non-finite value or invalid timestamp.
    #[error("invalid point: {reason}")]
    InvalidPoint { reason: String },

    /// The variable shortname is not registered for the target instrument.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// No instrument with this id is registered.
    #[error("no such instrument {0}")]
    NoSuchInstrument(u32),

    /// The instrument exists but does not own the requested variable.
    #[error("instrument {instrument_id} has no variable '{variable}'")]
    NoSuchVariable { instrument_id: u32, variable: String },

    /// The store lock could not be acquired within the bounded-latency window.
    /// Transient; callers may retry with backoff.
    #[error("store unavailable: lock not acquired within {0:?}")]
    StoreUnavailable(Duration),

    /// A query deadline elapsed mid-scan. Safe to retry.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Operation attempted on a closed database.
    #[error("database is closed")]
    DatabaseClosed,

    /// Timestamp is out of representable range (e.g. before the Unix epoch).
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// The AOF contains a record that does not match the expected framing.
    #[error("invalid AOF record format")]
    InvalidFormat,

    /// End of the AOF reached mid-record (truncated file).
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// An AOF rewrite is already running.
    #[error("AOF rewrite already in progress")]
    RewriteInProgress,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl ChordaError {
    /// Whether the caller may retry the operation after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChordaError::StoreUnavailable(_) | ChordaError::DeadlineExceeded
        )
    }

    pub(crate) fn invalid_point(reason: impl Into<String>) -> Self {
        ChordaError::InvalidPoint {
            reason: reason.into(),
        }
    }
}
