//! Internal engine state and AOF wiring.

use super::DBInner;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::store::PointStore;
use crate::types::{Config, DbStats, Measurement};

#[cfg(feature = "aof")]
use crate::persistence::{AofCommand, AofFile};
#[cfg(feature = "aof")]
use crate::types::{SyncMode, SyncPolicy};

impl DBInner {
    pub(crate) fn new_with_config(config: &Config) -> Self {
        Self {
            store: PointStore::new(),
            catalog: Catalog::new(),
            #[cfg(feature = "aof")]
            aof_file: None,
            closed: false,
            stats: DbStats::default(),
            config: config.clone(),
            #[cfg(feature = "aof")]
            sync_ops_since_flush: 0,
        }
    }

    /// Apply a validated measurement to the in-memory store and refresh
    /// the counters.
    pub(crate) fn apply_append(&mut self, m: &Measurement) -> Result<Option<f64>> {
        let old = self.store.append(m)?;
        self.refresh_counters();
        Ok(old)
    }

    pub(crate) fn refresh_counters(&mut self) {
        self.stats.point_count = self.store.point_count();
        self.stats.series_count = self.store.series_count();
        self.stats.instrument_count = self.catalog.len();
    }

    /// Load engine state from the AOF file (startup replay).
    ///
    /// Replays APPEND and PRUNE records sequentially to rebuild the store.
    /// Points whose instruments are no longer registered still load; catalog
    /// checks apply at ingest/query time, not at replay.
    #[cfg(feature = "aof")]
    pub(crate) fn load_from_aof(&mut self, aof_file: &mut AofFile) -> Result<()> {
        for command in aof_file.replay()? {
            match command {
                AofCommand::Append { .. } => {
                    if let Some(m) = command.into_measurement()
                        && let Err(e) = self.store.append(&m)
                    {
                        log::warn!(
                            "Skipping unreplayable AOF point for instrument {}: {}",
                            m.instrument_id,
                            e
                        );
                    }
                }
                AofCommand::Prune { cutoff_ms } => {
                    self.store.prune_older_than(cutoff_ms, usize::MAX);
                }
            }
        }

        self.refresh_counters();
        Ok(())
    }

    /// Write a single append to the AOF if persistence is enabled.
    #[cfg(feature = "aof")]
    pub(crate) fn write_append_to_aof_if_needed(&mut self, m: &Measurement) -> Result<()> {
        let (policy, mode, batch_size) = self.sync_settings();
        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        aof_file.write_append(m)?;
        self.maybe_flush_or_sync(policy, mode, batch_size)?;
        Ok(())
    }

    #[cfg(not(feature = "aof"))]
    pub(crate) fn write_append_to_aof_if_needed(&mut self, _m: &Measurement) -> Result<()> {
        Ok(())
    }

    /// Write a whole batch of appends to the AOF before any of them is
    /// applied in memory, so a store failure leaves either all records
    /// durable or none applied.
    #[cfg(feature = "aof")]
    pub(crate) fn write_batch_to_aof(&mut self, points: &[Measurement]) -> Result<()> {
        let (policy, mode, batch_size) = self.sync_settings();
        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        for m in points {
            aof_file.write_append(m)?;
        }
        self.maybe_flush_or_sync(policy, mode, batch_size)?;
        Ok(())
    }

    #[cfg(not(feature = "aof"))]
    pub(crate) fn write_batch_to_aof(&mut self, _points: &[Measurement]) -> Result<()> {
        Ok(())
    }

    /// Record a prune cutoff in the AOF if persistence is enabled.
    #[cfg(feature = "aof")]
    pub(crate) fn write_prune_to_aof_if_needed(&mut self, cutoff_ms: i64) -> Result<()> {
        let (policy, mode, batch_size) = self.sync_settings();
        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        aof_file.write_prune(cutoff_ms)?;
        self.maybe_flush_or_sync(policy, mode, batch_size)?;
        Ok(())
    }

    #[cfg(not(feature = "aof"))]
    pub(crate) fn write_prune_to_aof_if_needed(&mut self, _cutoff_ms: i64) -> Result<()> {
        Ok(())
    }

    #[cfg(feature = "aof")]
    pub(crate) fn aof_enabled(&self) -> bool {
        self.aof_file.is_some()
    }

    #[cfg(not(feature = "aof"))]
    pub(crate) fn aof_enabled(&self) -> bool {
        false
    }

    #[cfg(feature = "aof")]
    fn sync_settings(&self) -> (SyncPolicy, SyncMode, usize) {
        (
            self.config.sync_policy,
            self.config.sync_mode,
            self.config.sync_batch_size,
        )
    }

    #[cfg(feature = "aof")]
    fn maybe_flush_or_sync(
        &mut self,
        policy: SyncPolicy,
        mode: SyncMode,
        batch_size: usize,
    ) -> Result<()> {
        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        match policy {
            SyncPolicy::Always => {
                self.sync_ops_since_flush += 1;
                if self.sync_ops_since_flush >= batch_size {
                    aof_file.sync_with_mode(mode)?;
                    self.sync_ops_since_flush = 0;
                } else {
                    aof_file.flush()?;
                }
            }
            SyncPolicy::EverySecond => {
                aof_file.flush()?;
            }
            SyncPolicy::Never => {}
        }

        Ok(())
    }
}
