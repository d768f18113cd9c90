//! Live feed for Chorda
//!
//! Stateless polling support for near-real-time displays. The engine keeps
//! no per-client state: a client carries its own watermark (the timestamp of
//! the newest point it has seen) and each poll returns only what arrived
//! strictly after it, plus the poll-interval hint from configuration.

use crate::db::DB;
use crate::error::{ChordaError, Result};
use crate::types::Measurement;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calendar units accepted in a live window expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnits {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnits {
    /// Length of one unit in milliseconds.
    pub fn millis(self) -> f64 {
        match self {
            TimeUnits::Seconds => 1_000.0,
            TimeUnits::Minutes => 60_000.0,
            TimeUnits::Hours => 3_600_000.0,
            TimeUnits::Days => 86_400_000.0,
            TimeUnits::Weeks => 604_800_000.0,
        }
    }
}

/// Suffix table for parsing window expressions like `"10.minutes"`.
/// Singular and plural forms both resolve.
static UNIT_SUFFIXES: Lazy<FxHashMap<&'static str, TimeUnits>> = Lazy::new(|| {
    let mut map = FxHashMap::default();
    map.insert("second", TimeUnits::Seconds);
    map.insert("seconds", TimeUnits::Seconds);
    map.insert("minute", TimeUnits::Minutes);
    map.insert("minutes", TimeUnits::Minutes);
    map.insert("hour", TimeUnits::Hours);
    map.insert("hours", TimeUnits::Hours);
    map.insert("day", TimeUnits::Days);
    map.insert("days", TimeUnits::Days);
    map.insert("week", TimeUnits::Weeks);
    map.insert("weeks", TimeUnits::Weeks);
    map
});

/// A trailing display window, e.g. ten minutes of data ending now.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveWindow {
    pub value: f64,
    pub units: TimeUnits,
}

impl LiveWindow {
    pub fn new(value: f64, units: TimeUnits) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ChordaError::Other(format!(
                "Live window length must be positive and finite, got {}",
                value
            )));
        }
        Ok(Self { value, units })
    }

    /// Window length in milliseconds, saturating on overflow.
    pub fn duration_ms(&self) -> i64 {
        let ms = self.value * self.units.millis();
        if ms >= i64::MAX as f64 {
            i64::MAX
        } else {
            ms as i64
        }
    }
}

impl fmt::Display for LiveWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.units {
            TimeUnits::Seconds => "seconds",
            TimeUnits::Minutes => "minutes",
            TimeUnits::Hours => "hours",
            TimeUnits::Days => "days",
            TimeUnits::Weeks => "weeks",
        };
        write!(f, "{}.{}", self.value, unit)
    }
}

impl FromStr for LiveWindow {
    type Err = ChordaError;

    /// Parse a `"<number>.<unit>"` expression, e.g. `"10.minutes"` or
    /// `"1.hour"`. The number part must be a positive integer.
    fn from_str(s: &str) -> Result<Self> {
        let (value_part, unit_part) = s
            .split_once('.')
            .ok_or_else(|| ChordaError::Other(format!("Invalid live window '{}'", s)))?;

        let value: u32 = value_part
            .parse()
            .map_err(|_| ChordaError::Other(format!("Invalid live window length in '{}'", s)))?;
        let units = *UNIT_SUFFIXES
            .get(unit_part.trim().to_ascii_lowercase().as_str())
            .ok_or_else(|| ChordaError::Other(format!("Unknown live window unit in '{}'", s)))?;

        LiveWindow::new(value as f64, units)
    }
}

/// One poll response for a live display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveUpdate {
    /// New points, ascending; empty when nothing arrived since the watermark.
    pub points: Vec<Measurement>,
    /// Watermark to carry into the next poll. Unchanged when no new points
    /// arrived.
    pub watermark: Option<i64>,
    /// Suggested milliseconds until the next poll.
    pub refresh_msecs: u64,
    /// Point cap applied to this response.
    pub display_points: usize,
}

impl DB {
    /// Poll for new points since a client-held watermark.
    ///
    /// With no watermark the client is initializing and receives the most
    /// recent points of the series, capped at the variable's
    /// `maximum_plot_points` (falling back to the configured default). With
    /// a watermark only points strictly after it are returned, so repeated
    /// polls never duplicate data.
    pub fn live_poll(
        &self,
        instrument_id: u32,
        variable: &str,
        watermark: Option<i64>,
    ) -> Result<LiveUpdate> {
        let inner = self.read_checked()?;
        let var = inner.catalog.get_variable(instrument_id, variable)?;

        let display_points = var
            .maximum_plot_points
            .unwrap_or(inner.config.default_display_points);

        let points = match watermark {
            Some(after) => inner
                .store
                .tail(instrument_id, variable, after, display_points, None)?,
            None => inner.store.last_n(instrument_id, variable, display_points),
        };

        let watermark = points.last().map(|p| p.timestamp_ms).or(watermark);

        Ok(LiveUpdate {
            points,
            watermark,
            refresh_msecs: inner.config.refresh_msecs,
            display_points,
        })
    }

    /// Fetch the trailing window of a series for an initial live render.
    ///
    /// Returns points from `now - window` through now, capped like
    /// `live_poll`, newest points preferred when the cap truncates.
    pub fn live_query(
        &self,
        instrument_id: u32,
        variable: &str,
        window: &LiveWindow,
    ) -> Result<LiveUpdate> {
        let now_ms = crate::types::unix_ms_now()?;
        let window_start = now_ms.saturating_sub(window.duration_ms());

        let inner = self.read_checked()?;
        let var = inner.catalog.get_variable(instrument_id, variable)?;
        let display_points = var
            .maximum_plot_points
            .unwrap_or(inner.config.default_display_points);

        let mut points = inner
            .store
            .range(instrument_id, variable, window_start, now_ms, None)?;
        if points.len() > display_points {
            points.drain(..points.len() - display_points);
        }

        let watermark = points.last().map(|p| p.timestamp_ms);

        Ok(LiveUpdate {
            points,
            watermark,
            refresh_msecs: inner.config.refresh_msecs,
            display_points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Instrument, Variable};
    use crate::types::{Config, unix_ms_now};

    fn test_db() -> DB {
        let db = DB::memory_with_config(
            Config::default()
                .with_default_display_points(3)
                .with_refresh_msecs(1000),
        )
        .unwrap();
        db.register_instrument(
            Instrument::new(1, "met station")
                .with_variable(Variable::new("temp").unwrap())
                .with_variable(Variable::new("rh").unwrap().with_maximum_plot_points(2)),
        )
        .unwrap();
        db
    }

    #[test]
    fn test_window_parsing() {
        let window: LiveWindow = "10.minutes".parse().unwrap();
        assert_eq!(window.value, 10.0);
        assert_eq!(window.units, TimeUnits::Minutes);
        assert_eq!(window.duration_ms(), 600_000);

        assert_eq!(
            "1.hour".parse::<LiveWindow>().unwrap().duration_ms(),
            3_600_000
        );
        assert_eq!(
            "2.Weeks".parse::<LiveWindow>().unwrap().duration_ms(),
            2 * 604_800_000
        );

        assert!("ten.minutes".parse::<LiveWindow>().is_err());
        assert!("10.fortnights".parse::<LiveWindow>().is_err());
        assert!("10minutes".parse::<LiveWindow>().is_err());
        assert!(LiveWindow::new(0.0, TimeUnits::Seconds).is_err());
    }

    #[test]
    fn test_window_display_roundtrip() {
        let window: LiveWindow = "5.days".parse().unwrap();
        assert_eq!(window.to_string(), "5.days");
        assert_eq!(window.to_string().parse::<LiveWindow>().unwrap(), window);
    }

    #[test]
    fn test_initial_poll_returns_recent_capped() {
        let db = test_db();
        for ts in [100, 200, 300, 400, 500] {
            db.append(Measurement::new(1, "temp", ts, ts as f64)).unwrap();
        }

        let update = db.live_poll(1, "temp", None).unwrap();
        let timestamps: Vec<i64> = update.points.iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(timestamps, vec![300, 400, 500]);
        assert_eq!(update.watermark, Some(500));
        assert_eq!(update.refresh_msecs, 1000);
        assert_eq!(update.display_points, 3);
    }

    #[test]
    fn test_repeated_polls_never_duplicate() {
        let db = test_db();
        for ts in [100, 200, 300] {
            db.append(Measurement::new(1, "temp", ts, 1.0)).unwrap();
        }

        let first = db.live_poll(1, "temp", None).unwrap();
        assert_eq!(first.watermark, Some(300));

        // Nothing new: empty poll, watermark carried forward.
        let second = db.live_poll(1, "temp", first.watermark).unwrap();
        assert!(second.points.is_empty());
        assert_eq!(second.watermark, Some(300));

        db.append(Measurement::new(1, "temp", 400, 4.0)).unwrap();
        let third = db.live_poll(1, "temp", second.watermark).unwrap();
        assert_eq!(third.points.len(), 1);
        assert_eq!(third.points[0].timestamp_ms, 400);
        assert_eq!(third.watermark, Some(400));
    }

    #[test]
    fn test_per_variable_plot_cap_overrides_default() {
        let db = test_db();
        for ts in [100, 200, 300, 400] {
            db.append(Measurement::new(1, "rh", ts, 50.0)).unwrap();
        }

        let update = db.live_poll(1, "rh", None).unwrap();
        assert_eq!(update.display_points, 2);
        assert_eq!(update.points.len(), 2);
        assert_eq!(update.points[0].timestamp_ms, 300);
    }

    #[test]
    fn test_live_query_trailing_window() {
        let db = test_db();
        let now_ms = unix_ms_now().unwrap();

        db.append(Measurement::new(1, "temp", now_ms - 120_000, 1.0))
            .unwrap();
        db.append(Measurement::new(1, "temp", now_ms - 30_000, 2.0))
            .unwrap();
        db.append(Measurement::new(1, "temp", now_ms - 10_000, 3.0))
            .unwrap();

        let window: LiveWindow = "1.minute".parse().unwrap();
        let update = db.live_query(1, "temp", &window).unwrap();

        assert_eq!(update.points.len(), 2);
        assert!(update.points.iter().all(|p| p.timestamp_ms >= now_ms - 60_000));
        assert_eq!(update.watermark, Some(now_ms - 10_000));
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let db = test_db();
        assert!(db.live_poll(9, "temp", None).is_err());
        assert!(db.live_poll(1, "pressure", None).is_err());
    }
}
