//! Per-device daily and period averages.
//!
//! Days are UTC calendar dates of each record's timestamp. Daily averages keep
//! full precision; period averages are rounded to two decimals when published.
//! Absent quantities are skipped, never counted as zero, and a quantity that a
//! device never reported has an absent period average.
//!
//! Values are summed in a canonical order (sorted by `f64::total_cmp`) so the
//! result does not depend on the order records arrive in.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::record::TelemetryRecord;
use crate::snapshot::{DailyAverage, Snapshot};

/// Bookkeeping for one aggregation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    /// Rows attributed to a known device.
    pub accepted: usize,
    /// Rows missing a device id or timestamp.
    pub malformed: usize,
    /// Well-formed rows from devices outside the known set.
    pub unknown_device: usize,
}

impl AggregateStats {
    pub fn total(&self) -> usize {
        self.accepted + self.malformed + self.unknown_device
    }
}

/// Reduces one cycle's rows to a [`Snapshot`].
#[derive(Debug, Clone)]
pub struct Aggregator {
    devices: BTreeSet<String>,
    quantities: BTreeSet<String>,
}

impl Aggregator {
    pub fn new<D, Q>(devices: D, quantities: Q) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        Q: IntoIterator,
        Q::Item: Into<String>,
    {
        Self {
            devices: devices.into_iter().map(Into::into).collect(),
            quantities: quantities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(String::as_str)
    }

    pub fn quantities(&self) -> impl Iterator<Item = &str> {
        self.quantities.iter().map(String::as_str)
    }

    /// Aggregate `records` into a snapshot stamped with `generated_at`.
    ///
    /// Every known device appears in the result, with empty series and absent
    /// period averages when it has no usable rows.
    pub fn aggregate(&self, records: &[TelemetryRecord], generated_at: DateTime<Utc>) -> Snapshot {
        // device -> quantity -> day -> values
        let mut samples: BTreeMap<&str, BTreeMap<&str, BTreeMap<NaiveDate, Vec<f64>>>> = self
            .devices
            .iter()
            .map(|device| {
                let per_quantity = self
                    .quantities
                    .iter()
                    .map(|q| (q.as_str(), BTreeMap::new()))
                    .collect();
                (device.as_str(), per_quantity)
            })
            .collect();
        let mut stats = AggregateStats::default();

        for record in records {
            let (device, timestamp) = match record.validate() {
                Ok(key) => key,
                Err(e) => {
                    log::debug!("skipping malformed record: {e}");
                    stats.malformed += 1;
                    continue;
                }
            };
            let Some(per_quantity) = samples.get_mut(device) else {
                stats.unknown_device += 1;
                continue;
            };
            stats.accepted += 1;

            let day = timestamp.date_naive();
            for (quantity, days) in per_quantity.iter_mut() {
                if let Some(value) = record.quantity(quantity) {
                    days.entry(day).or_default().push(value);
                }
            }
        }

        let mut series: BTreeMap<String, BTreeMap<String, Vec<DailyAverage>>> = self
            .quantities
            .iter()
            .map(|q| (q.clone(), BTreeMap::new()))
            .collect();
        let mut period_averages = BTreeMap::new();

        for (device, per_quantity) in samples {
            let mut averages = BTreeMap::new();
            for (quantity, days) in per_quantity {
                let mut all = Vec::new();
                let daily: Vec<DailyAverage> = days
                    .into_iter()
                    .filter_map(|(day, mut values)| {
                        all.extend_from_slice(&values);
                        mean(&mut values).map(|value| DailyAverage { day, value })
                    })
                    .collect();

                averages.insert(quantity.to_string(), mean(&mut all).map(round2));
                if let Some(devices) = series.get_mut(quantity) {
                    devices.insert(device.to_string(), daily);
                }
            }
            period_averages.insert(device.to_string(), averages);
        }

        Snapshot {
            series,
            period_averages,
            generated_at,
            stats,
            generation: 0,
        }
    }
}

/// Arithmetic mean, summed in sorted order. `None` for an empty slice.
///
/// Finite inputs always give a finite mean: if the plain sum overflows, the
/// values are scaled down before summing.
fn mean(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    if sum.is_finite() {
        Some(sum / n)
    } else {
        Some(values.iter().map(|v| v / n).sum())
    }
}

/// Round to two decimals, ties to even.
fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if !scaled.is_finite() {
        // Already far past two-decimal precision.
        return value;
    }
    scaled.round_ties_even() / 100.0
}
