//! Core engine implementation for Chorda.
//!
//! This module defines the main `DB` type: a thread-safe facade over the
//! point store, the instrument catalog, and the optional append-only file.

use crate::catalog::{Catalog, Instrument};
use crate::error::{ChordaError, Result};
use crate::store::PointStore;
use crate::types::{Config, DbStats, Measurement};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "aof")]
use crate::persistence::AofFile;
#[cfg(feature = "aof")]
use std::path::Path;

mod internal;

/// Main Chorda engine handle.
///
/// `DB` is the core of Chorda, offering:
/// - Append-only time-series storage keyed by (instrument, variable, timestamp)
/// - Validated batch ingestion with itemized partial acceptance
/// - Range, tail, last, and multi-variable fan-out queries with deadlines
/// - Age-based retention pruning
/// - Stateless live polling with client-side watermarks
/// - Optional persistence with append-only file (AOF) format
///
/// # Thread Safety
///
/// `DB` is `Clone` and thread-safe: clones share state through an internal
/// `Arc<RwLock<..>>`. Readers proceed concurrently; a write takes exclusive
/// access, which trivially gives the single-logical-writer ordering each
/// instrument needs. Lock acquisition is bounded by `Config::lock_timeout_ms`;
/// when the window elapses the operation fails with `StoreUnavailable`
/// instead of hanging the caller.
///
/// # Examples
///
/// ```rust
/// use chorda::{Chorda, Instrument, Variable, Measurement};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = Chorda::memory()?;
/// db.register_instrument(
///     Instrument::new(1, "met station").with_variable(Variable::new("temp")?),
/// )?;
///
/// db.append(Measurement::new(1, "temp", 1_000, 21.5))?;
/// let points = db.range_query(1, "temp", 0, i64::MAX, None)?;
/// assert_eq!(points.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DB {
    pub(crate) inner: Arc<RwLock<DBInner>>,
    lock_timeout: Duration,
}

pub(crate) struct DBInner {
    /// Time-ordered point storage
    pub store: PointStore,
    /// Registered instruments and their variables
    pub catalog: Catalog,
    /// Append-only file for persistence
    #[cfg(feature = "aof")]
    pub aof_file: Option<AofFile>,
    /// Whether the engine is closed
    pub closed: bool,
    /// Engine statistics
    pub stats: DbStats,
    /// Configuration
    pub config: Config,
    /// Number of writes since last forced sync (SyncPolicy::Always only)
    #[cfg(feature = "aof")]
    sync_ops_since_flush: usize,
}

impl DB {
    /// Opens a Chorda engine from a file path or creates a new one.
    ///
    /// Opening an existing engine replays the append-only file (AOF) to
    /// restore all points to their previous state.
    ///
    /// # Arguments
    ///
    /// * `path` - File system path for the AOF
    #[cfg(feature = "aof")]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a persistent engine with custom configuration.
    ///
    /// Like `open()`, replays the AOF on startup to restore previous state.
    #[cfg(feature = "aof")]
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let mut inner = DBInner::new_with_config(&config);

        let mut aof_file = AofFile::open(path)?;
        inner.load_from_aof(&mut aof_file)?;
        inner.aof_file = Some(aof_file);

        Ok(DB {
            lock_timeout: config.lock_timeout(),
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    /// Creates a new in-memory engine (no persistence).
    pub fn memory() -> Result<Self> {
        Self::memory_with_config(Config::default())
    }

    /// Create an in-memory engine with custom configuration
    pub fn memory_with_config(config: Config) -> Result<Self> {
        let inner = DBInner::new_with_config(&config);
        Ok(DB {
            lock_timeout: config.lock_timeout(),
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    /// Create an engine builder for advanced configuration.
    pub fn builder() -> crate::builder::DBBuilder {
        crate::builder::DBBuilder::new()
    }

    /// Get engine statistics
    pub fn stats(&self) -> Result<DbStats> {
        let inner = self.read_checked()?;
        Ok(inner.stats.clone())
    }

    /// Get a copy of the engine configuration
    pub fn config(&self) -> Result<Config> {
        let inner = self.read_checked()?;
        Ok(inner.config.clone())
    }

    /// Register an instrument and its variables.
    ///
    /// Re-registering an id replaces the prior definition; stored points are
    /// untouched.
    pub fn register_instrument(&self, instrument: Instrument) -> Result<()> {
        let mut inner = self.write_checked()?;
        inner.catalog.register(instrument);
        inner.refresh_counters();
        Ok(())
    }

    /// Fetch a registered instrument by id.
    pub fn instrument(&self, id: u32) -> Result<Instrument> {
        let inner = self.read_checked()?;
        inner.catalog.get(id).cloned()
    }

    /// Append a single measurement.
    ///
    /// The variable must be registered for the instrument. With AOF enabled
    /// the record is durable (per the configured `SyncPolicy`) before the
    /// in-memory apply; a persistence failure means nothing lands.
    ///
    /// Returns the overwritten value when the (instrument, variable,
    /// timestamp) key already existed.
    pub fn append(&self, m: Measurement) -> Result<Option<f64>> {
        m.validate()?;

        let mut inner = self.write_checked()?;
        inner
            .catalog
            .get_variable(m.instrument_id, &m.variable)
            .map_err(|e| match e {
                ChordaError::NoSuchVariable { variable, .. } => {
                    ChordaError::UnknownVariable(variable)
                }
                other => other,
            })?;

        inner.write_append_to_aof_if_needed(&m)?;
        let old = inner.apply_append(&m)?;
        inner.stats.record_operation();
        Ok(old)
    }

    /// Force sync all pending writes to disk.
    ///
    /// Flushes the AOF buffer and syncs so all data is durably on disk.
    #[cfg(feature = "aof")]
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.write_checked()?;
        let sync_mode = inner.config.sync_mode;
        if let Some(ref mut aof_file) = inner.aof_file {
            aof_file.sync_with_mode(sync_mode)?;
            inner.sync_ops_since_flush = 0;
        }
        Ok(())
    }

    /// Gracefully close the engine.
    ///
    /// Marks the engine closed (rejecting new operations), flushes pending
    /// writes, and syncs the AOF. Further operations on this handle or any
    /// clone return `DatabaseClosed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.write()?;
        if inner.closed {
            return Err(ChordaError::DatabaseClosed);
        }

        inner.closed = true;
        #[cfg(feature = "aof")]
        {
            let sync_mode = inner.config.sync_mode;
            if let Some(ref mut aof_file) = inner.aof_file {
                aof_file.sync_with_mode(sync_mode)?;
                inner.sync_ops_since_flush = 0;
            }
        }
        Ok(())
    }

    // Internal helper methods

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, DBInner>> {
        self.inner
            .try_read_for(self.lock_timeout)
            .ok_or(ChordaError::StoreUnavailable(self.lock_timeout))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, DBInner>> {
        self.inner
            .try_write_for(self.lock_timeout)
            .ok_or(ChordaError::StoreUnavailable(self.lock_timeout))
    }

    pub(crate) fn read_checked(&self) -> Result<RwLockReadGuard<'_, DBInner>> {
        let inner = self.read()?;
        if inner.closed {
            return Err(ChordaError::DatabaseClosed);
        }
        Ok(inner)
    }

    pub(crate) fn write_checked(&self) -> Result<RwLockWriteGuard<'_, DBInner>> {
        let inner = self.write()?;
        if inner.closed {
            return Err(ChordaError::DatabaseClosed);
        }
        Ok(inner)
    }
}

/// Best-effort sync on drop.
///
/// When a handle is dropped, pending AOF writes are flushed and synced,
/// errors ignored. The engine is NOT marked closed so other clones keep
/// operating; use `close()` for an explicit shutdown.
#[cfg(feature = "aof")]
impl Drop for DB {
    fn drop(&mut self) {
        // Only the last handle syncs
        if Arc::strong_count(&self.inner) > 1 {
            return;
        }

        let Some(mut inner) = self.inner.try_write() else {
            return;
        };
        if inner.closed {
            return;
        }

        let sync_mode = inner.config.sync_mode;
        if let Some(ref mut aof_file) = inner.aof_file
            && aof_file.sync_with_mode(sync_mode).is_ok()
        {
            inner.sync_ops_since_flush = 0;
        }
    }
}
