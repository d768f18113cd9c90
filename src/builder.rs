//! Builder for constructing a configured engine.

use crate::catalog::Instrument;
use crate::db::DB;
use crate::error::Result;
use crate::types::Config;

#[cfg(feature = "aof")]
use std::path::PathBuf;

/// Fluent construction of a `DB`.
///
/// # Examples
///
/// ```rust
/// use chorda::{DB, Instrument, Variable, SyncPolicy};
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = DB::builder()
///     .retention(Duration::from_secs(7 * 24 * 3600))
///     .sync_policy(SyncPolicy::EverySecond)
///     .instrument(Instrument::new(1, "met station").with_variable(Variable::new("temp")?))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DBBuilder {
    #[cfg(feature = "aof")]
    path: Option<PathBuf>,
    config: Config,
    instruments: Vec<Instrument>,
}

impl DBBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist to an append-only file at `path`. Without this the engine is
    /// in-memory only.
    #[cfg(feature = "aof")]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn retention(mut self, retention: std::time::Duration) -> Self {
        self.config = self.config.with_retention(retention);
        self
    }

    pub fn sync_policy(mut self, policy: crate::types::SyncPolicy) -> Self {
        self.config = self.config.with_sync_policy(policy);
        self
    }

    /// Register an instrument at startup, before any ingest.
    pub fn instrument(mut self, instrument: Instrument) -> Self {
        self.instruments.push(instrument);
        self
    }

    pub fn build(self) -> Result<DB> {
        if let Err(e) = self.config.validate() {
            return Err(crate::error::ChordaError::Other(e));
        }

        #[cfg(feature = "aof")]
        let db = match self.path {
            Some(path) => DB::open_with_config(path, self.config)?,
            None => DB::memory_with_config(self.config)?,
        };
        #[cfg(not(feature = "aof"))]
        let db = DB::memory_with_config(self.config)?;

        for instrument in self.instruments {
            db.register_instrument(instrument)?;
        }
        Ok(db)
    }
}
