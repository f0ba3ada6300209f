//! Raw telemetry rows and their decoding from the remote JSON schema.
//!
//! The remote source is schema-flexible: columns come and go, values may be
//! numbers or numeric strings, and timestamps arrive in several formats.
//! Decoding never fails a whole fetch. A row that lacks its device id or
//! timestamp is kept with the field absent so the aggregator can reject it
//! individually; a quantity that is missing or unreadable is simply absent.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MalformedRecordError;

/// One raw observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub device_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Present quantities only; absence means "not reported".
    pub quantities: BTreeMap<String, f64>,
}

impl TelemetryRecord {
    pub fn new(device_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            timestamp: Some(timestamp),
            quantities: BTreeMap::new(),
        }
    }

    /// Attach a quantity. Non-finite values are treated as absent.
    pub fn with_quantity(mut self, name: impl Into<String>, value: f64) -> Self {
        if value.is_finite() {
            self.quantities.insert(name.into(), value);
        }
        self
    }

    pub fn quantity(&self, name: &str) -> Option<f64> {
        self.quantities.get(name).copied()
    }

    /// The device and instant this row belongs to.
    pub fn validate(&self) -> Result<(&str, DateTime<Utc>), MalformedRecordError> {
        let device = self
            .device_id
            .as_deref()
            .ok_or(MalformedRecordError::MissingDeviceId)?;
        let timestamp = self
            .timestamp
            .ok_or(MalformedRecordError::MissingTimestamp)?;
        Ok((device, timestamp))
    }

    /// Decode one `_items` entry. Anything that is not an object decodes to
    /// a record with every field absent.
    pub fn from_json(item: &Value, fields: &FieldMap) -> Self {
        let Some(object) = item.as_object() else {
            return Self {
                device_id: None,
                timestamp: None,
                quantities: BTreeMap::new(),
            };
        };

        let device_id = object.get(&fields.device).and_then(parse_device_id);
        let timestamp = object.get(&fields.timestamp).and_then(parse_timestamp);
        let quantities = fields
            .quantities
            .iter()
            .filter_map(|(quantity, column)| {
                let value = object.get(column).and_then(parse_number)?;
                Some((quantity.clone(), value))
            })
            .collect();

        Self {
            device_id,
            timestamp,
            quantities,
        }
    }
}

/// Column names of the remote schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    /// Column holding the device identifier.
    pub device: String,
    /// Column holding the observation instant.
    pub timestamp: String,
    /// Tracked quantity name → column name.
    pub quantities: BTreeMap<String, String>,
}

impl FieldMap {
    /// Map every quantity in `quantities` to a column, keeping explicit
    /// mappings and falling back to the quantity name itself.
    pub fn covering(&self, quantities: &[String]) -> Self {
        let quantities = quantities
            .iter()
            .map(|q| {
                let column = self.quantities.get(q).cloned().unwrap_or_else(|| q.clone());
                (q.clone(), column)
            })
            .collect();
        Self {
            device: self.device.clone(),
            timestamp: self.timestamp.clone(),
            quantities,
        }
    }
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            device: "Device_ID".to_string(),
            timestamp: "Time_Stamp".to_string(),
            quantities: BTreeMap::from([
                ("energy".to_string(), "unit_consumption".to_string()),
                ("temperature".to_string(), "Temperature".to_string()),
                ("humidity".to_string(), "Humidity".to_string()),
            ]),
        }
    }
}

fn parse_device_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Accepts RFC 3339, RFC 1123/2822, naive date-times (read as UTC), bare
/// dates, or a Unix epoch in seconds.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                return DateTime::from_timestamp(secs, 0);
            }
            let secs = n.as_f64().filter(|v| v.is_finite())?;
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            DateTime::from_timestamp(whole as i64, nanos)
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
