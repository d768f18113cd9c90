//! Core types and configuration for Chorda
//!
//! This module provides the measurement tuple, the serializable engine
//! configuration, and the statistics counters.

use crate::error::{ChordaError, Result};
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A single sensor measurement.
///
/// Uniquely keyed by `(instrument_id, variable, timestamp_ms)`; writing the
/// same key again overwrites the prior value (last-write-wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub instrument_id: u32,
    /// Variable shortname, e.g. `"temp"`.
    pub variable: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Measurement {
    pub fn new(
        instrument_id: u32,
        variable: impl Into<String>,
        timestamp_ms: i64,
        value: f64,
    ) -> Self {
        Self {
            instrument_id,
            variable: variable.into(),
            timestamp_ms,
            value,
        }
    }

    /// Validate the tuple: the value must be finite and the timestamp
    /// non-negative (the epoch is the earliest representable instant).
    pub fn validate(&self) -> Result<()> {
        if !self.value.is_finite() {
            return Err(ChordaError::invalid_point(format!(
                "value must be finite, got {}",
                self.value
            )));
        }
        if self.timestamp_ms < 0 {
            return Err(ChordaError::invalid_point(format!(
                "timestamp must not precede the epoch, got {}",
                self.timestamp_ms
            )));
        }
        Ok(())
    }
}

/// Convert a `SystemTime` to milliseconds since the Unix epoch.
pub fn unix_ms(t: SystemTime) -> Result<i64> {
    let ms = t
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ChordaError::InvalidTimestamp)?
        .as_millis();
    i64::try_from(ms).map_err(|_| ChordaError::InvalidTimestamp)
}

/// Current time in milliseconds since the Unix epoch.
pub fn unix_ms_now() -> Result<i64> {
    unix_ms(SystemTime::now())
}

/// Synchronization policy for persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Never sync to disk (fastest, least safe)
    Never,
    /// Sync every second (recommended default)
    #[default]
    EverySecond,
    /// Sync after every write (slowest, safest)
    Always,
}

/// File synchronization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Call `fsync` / `File::sync_all` to persist metadata + data.
    #[default]
    All,
    /// Call `fdatasync` / `File::sync_data` to persist data only.
    Data,
}

/// Engine configuration
///
/// Designed to be easily serializable and loadable from JSON, TOML, or other
/// formats while keeping complexity minimal.
///
/// # Example
///
/// ```rust
/// use chorda::{Config, SyncPolicy};
///
/// // Create default config
/// let config = Config::default();
///
/// // Load from JSON
/// let json = r#"{
///     "sync_policy": "always",
///     "retention_seconds": 86400,
///     "refresh_msecs": 1000
/// }"#;
/// let config: Config = serde_json::from_str(json).unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How often data is synced to disk
    #[serde(default)]
    pub sync_policy: SyncPolicy,

    /// Controls whether the engine issues `fsync` or `fdatasync`.
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Number of writes to batch before forcing a sync when `SyncPolicy::Always`.
    #[serde(default = "Config::default_sync_batch_size")]
    pub sync_batch_size: usize,

    /// Maximum age of points in seconds (None means keep forever)
    #[serde(default)]
    pub retention_seconds: Option<f64>,

    /// Maximum points removed per prune batch (0 = sweep in one pass)
    #[serde(default = "Config::default_prune_batch_size")]
    pub prune_batch_size: usize,

    /// Seconds between background prune cycles
    #[serde(default = "Config::default_prune_interval_seconds")]
    pub prune_interval_seconds: u64,

    /// Poll-interval hint returned to live clients
    #[serde(default = "Config::default_refresh_msecs")]
    pub refresh_msecs: u64,

    /// Live-query point cap for variables without `maximum_plot_points`
    #[serde(default = "Config::default_display_points")]
    pub default_display_points: usize,

    /// Upper bound on lock acquisition before `StoreUnavailable`
    #[serde(default = "Config::default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Config {
    const fn default_sync_batch_size() -> usize {
        1
    }

    const fn default_prune_batch_size() -> usize {
        4096
    }

    const fn default_prune_interval_seconds() -> u64 {
        60
    }

    const fn default_refresh_msecs() -> u64 {
        5000
    }

    const fn default_display_points() -> usize {
        100
    }

    const fn default_lock_timeout_ms() -> u64 {
        5000
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_seconds = Some(retention.as_secs_f64());
        self
    }

    /// Keep points forever (disables pruning).
    pub fn with_infinite_retention(mut self) -> Self {
        self.retention_seconds = None;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Adjust the number of writes to batch before syncing when `SyncPolicy::Always`.
    pub fn with_sync_batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "Sync batch size must be greater than zero");
        self.sync_batch_size = batch_size;
        self
    }

    pub fn with_prune_batch_size(mut self, batch_size: usize) -> Self {
        self.prune_batch_size = batch_size;
        self
    }

    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval_seconds = interval.as_secs();
        self
    }

    pub fn with_refresh_msecs(mut self, msecs: u64) -> Self {
        assert!(msecs > 0, "Refresh interval must be greater than zero");
        self.refresh_msecs = msecs;
        self
    }

    pub fn with_default_display_points(mut self, points: usize) -> Self {
        assert!(points > 0, "Display point cap must be greater than zero");
        self.default_display_points = points;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Get the retention horizon as a Duration (None = infinite)
    pub fn retention(&self) -> Option<Duration> {
        self.retention_seconds.and_then(|secs| {
            if secs.is_finite() && secs > 0.0 && secs <= u64::MAX as f64 {
                Some(Duration::from_secs_f64(secs))
            } else {
                None
            }
        })
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(secs) = self.retention_seconds {
            if !secs.is_finite() {
                return Err("Retention must be finite (not NaN or infinity)".to_string());
            }
            if secs <= 0.0 {
                return Err("Retention must be positive".to_string());
            }
            if secs > u64::MAX as f64 {
                return Err("Retention is too large".to_string());
            }
        }

        if self.sync_batch_size == 0 {
            return Err("Sync batch size must be greater than zero".to_string());
        }

        if self.default_display_points == 0 {
            return Err("Display point cap must be greater than zero".to_string());
        }

        if self.refresh_msecs == 0 {
            return Err("Refresh interval must be greater than zero".to_string());
        }

        if self.lock_timeout_ms == 0 {
            return Err("Lock timeout must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_policy: SyncPolicy::default(),
            sync_mode: SyncMode::default(),
            sync_batch_size: Self::default_sync_batch_size(),
            retention_seconds: None,
            prune_batch_size: Self::default_prune_batch_size(),
            prune_interval_seconds: Self::default_prune_interval_seconds(),
            refresh_msecs: Self::default_refresh_msecs(),
            default_display_points: Self::default_display_points(),
            lock_timeout_ms: Self::default_lock_timeout_ms(),
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbStats {
    /// Number of stored points
    pub point_count: usize,
    /// Number of distinct (instrument, variable) series
    pub series_count: usize,
    /// Number of registered instruments
    pub instrument_count: usize,
    /// Points removed by retention pruning
    pub pruned_count: u64,
    /// Total number of operations performed
    pub operations_count: u64,
}

impl DbStats {
    /// Create new empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation
    pub fn record_operation(&mut self) {
        self.operations_count += 1;
    }

    /// Record pruned points
    pub fn record_pruned(&mut self, count: u64) {
        self.pruned_count += count;
    }
}
