//! Runtime configuration.
//!
//! Loaded from an optional JSON file; every field has a default so a partial
//! file only overrides what it names. Durations are written as `"<n><unit>"`
//! with unit `ms`, `s`, `m`, `h` or `d` (a bare number means seconds).
//!
//! ```json
//! {
//!   "base_url": "http://10.1.19.105:5000/energygrid2",
//!   "devices": ["D250AC01", "D250AC02"],
//!   "window_offsets": ["31d", "16d", "0d"],
//!   "refresh_interval": "5m"
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregator;
use crate::error::ConfigError;
use crate::record::FieldMap;
use crate::source::DEFAULT_MAX_RESULTS;
use crate::window::WindowPlanner;

/// Key under which period averages are served; cannot be a quantity name.
pub const PERIOD_AVERAGES_KEY: &str = "monthly_avg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Remote collection endpoint, without query string.
    pub base_url: String,
    /// Known device ids; rows from other devices are ignored.
    pub devices: Vec<String>,
    /// Tracked quantity names.
    pub quantities: Vec<String>,
    /// Remote column names.
    pub fields: FieldMap,
    /// Window boundaries before now, oldest first, ending at zero.
    #[serde(with = "duration_list")]
    pub window_offsets: Vec<Duration>,
    /// Pause after a successful cycle.
    #[serde(with = "duration_str")]
    pub refresh_interval: Duration,
    /// Pause after a failed cycle.
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,
    /// Per-request transport timeout.
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    pub max_results: usize,
    /// Query endpoint bind address.
    pub bind: String,
    /// `Access-Control-Allow-Origin` value for the data endpoint.
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        const DAY: u64 = 86_400;
        Self {
            base_url: "http://127.0.0.1:5000/energygrid2".to_string(),
            devices: vec![
                "D250AC01".to_string(),
                "D250AC02".to_string(),
                "D250AC03".to_string(),
            ],
            quantities: vec![
                "energy".to_string(),
                "temperature".to_string(),
                "humidity".to_string(),
            ],
            fields: FieldMap::default(),
            window_offsets: vec![
                Duration::from_secs(31 * DAY),
                Duration::from_secs(16 * DAY),
                Duration::ZERO,
            ],
            refresh_interval: Duration::from_secs(300),
            retry_delay: Duration::from_secs(300),
            request_timeout: Duration::from_secs(60),
            max_results: DEFAULT_MAX_RESULTS,
            bind: "0.0.0.0:5001".to_string(),
            cors_origin: Some("*".to_string()),
        }
    }
}

impl Config {
    /// Read a JSON configuration file. The result is not yet validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(invalid("at least one device id is required"));
        }
        if self.devices.iter().any(|d| d.trim().is_empty()) {
            return Err(invalid("device ids must not be blank"));
        }
        if self.quantities.is_empty() {
            return Err(invalid("at least one quantity is required"));
        }
        if let Some(q) = self.quantities.iter().find(|q| q.as_str() == PERIOD_AVERAGES_KEY) {
            return Err(invalid(&format!("{q:?} is reserved and cannot be a quantity name")));
        }
        if self.refresh_interval.is_zero() || self.retry_delay.is_zero() {
            return Err(invalid("refresh_interval and retry_delay must be non-zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout must be non-zero"));
        }
        if self.max_results == 0 {
            return Err(invalid("max_results must be at least 1"));
        }
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| invalid(&format!("base_url {:?}: {e}", self.base_url)))?;
        self.planner()?;
        Ok(())
    }

    pub fn planner(&self) -> Result<WindowPlanner, ConfigError> {
        WindowPlanner::from_offsets(&self.window_offsets)
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.devices.iter().cloned(), self.quantities.iter().cloned())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Parse `"<n>ms"`, `"<n>s"`, `"<n>m"`, `"<n>h"`, `"<n>d"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else if let Some(rest) = s.strip_suffix('d') {
        (rest, 86_400_000)
    } else {
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| invalid(&format!("invalid duration: {s:?}")))?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| invalid(&format!("duration out of range: {s:?}")))
}

/// Shortest exact rendering in the units [`parse_duration`] accepts.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    for (unit, size) in [("d", 86_400_000u128), ("h", 3_600_000), ("m", 60_000), ("s", 1000)] {
        if ms % size == 0 {
            return format!("{}{unit}", ms / size);
        }
    }
    format!("{ms}ms")
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

mod duration_list {
    use std::time::Duration;

    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(list: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(list.len()))?;
        for d in list {
            seq.serialize_element(&super::format_duration(*d))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Duration>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| super::parse_duration(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
