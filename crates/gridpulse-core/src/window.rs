//! Splitting the trailing horizon into fetch windows.
//!
//! The remote source caps how many rows a single request may return, so one
//! cycle covers its horizon with several adjacent half-open windows instead of
//! one large query. A planner is described by its offsets before `now`, oldest
//! first: `[31d, 16d, 0d]` yields `[now-31d, now-16d)` and `[now-16d, now)`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;

use crate::error::ConfigError;

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn span(&self) -> TimeDelta {
        self.end - self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Produces the windows of one refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlanner {
    /// Strictly decreasing, ends at zero.
    offsets: Vec<TimeDelta>,
}

impl WindowPlanner {
    /// Build a planner from boundary offsets before `now`, oldest first.
    ///
    /// Offsets must be strictly decreasing, end at zero, and contain at least
    /// two entries (one window).
    pub fn from_offsets(offsets: &[Duration]) -> Result<Self, ConfigError> {
        if offsets.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "window offsets need at least two boundaries, got {}",
                offsets.len()
            )));
        }
        if offsets.last() != Some(&Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "the last window offset must be 0 (windows end at now)".to_string(),
            ));
        }
        if let Some(pair) = offsets.windows(2).find(|pair| pair[0] <= pair[1]) {
            return Err(ConfigError::Invalid(format!(
                "window offsets must be strictly decreasing ({:?} is followed by {:?})",
                pair[0], pair[1]
            )));
        }

        let offsets = offsets
            .iter()
            .map(|offset| {
                TimeDelta::from_std(*offset).map_err(|_| {
                    ConfigError::Invalid(format!("window offset {offset:?} is out of range"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { offsets })
    }

    /// Partition `horizon` into `count` windows of equal width.
    pub fn even(horizon: Duration, count: usize) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::Invalid(
                "window count must be at least 1".to_string(),
            ));
        }
        let total = horizon.as_nanos();
        let n = count as u128;
        let offsets = (0..=n)
            .map(|i| {
                let nanos = total * (n - i) / n;
                u64::try_from(nanos)
                    .map(Duration::from_nanos)
                    .map_err(|_| ConfigError::Invalid(format!("horizon {horizon:?} is too large")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_offsets(&offsets)
    }

    /// Total span covered by one cycle.
    pub fn horizon(&self) -> TimeDelta {
        self.offsets[0]
    }

    pub fn window_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Windows for a cycle starting at `now`, oldest first.
    pub fn plan(&self, now: DateTime<Utc>) -> Vec<TimeWindow> {
        self.offsets
            .windows(2)
            .map(|pair| TimeWindow::new(now - pair[0], now - pair[1]))
            .collect()
    }
}

impl Default for WindowPlanner {
    fn default() -> Self {
        Self {
            offsets: vec![TimeDelta::days(31), TimeDelta::days(16), TimeDelta::zero()],
        }
    }
}
