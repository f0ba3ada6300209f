//! Published aggregation results and the store that holds the latest one.
//!
//! A [`Snapshot`] is immutable once built. The [`SnapshotStore`] swaps whole
//! snapshots behind an atomic pointer, so a reader either sees the previous
//! cycle in full or the new one in full, and never waits for the writer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::aggregate::AggregateStats;

/// Mean of one quantity for one device on one UTC calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyAverage {
    pub day: NaiveDate,
    /// Full precision; only period averages are rounded.
    pub value: f64,
}

/// Mean of one quantity across the whole horizon, rounded to 2 decimals.
/// `None` when the device never reported the quantity.
pub type PeriodAverage = Option<f64>;

/// quantity → device → daily series, ascending by day.
pub type DailySeries = BTreeMap<String, BTreeMap<String, Vec<DailyAverage>>>;

/// device → quantity → period average.
pub type PeriodAverages = BTreeMap<String, BTreeMap<String, PeriodAverage>>;

/// Complete result of one successful refresh cycle.
///
/// Serializes as `{"<quantity>": {"<device>": [..]}, .., "monthly_avg": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub series: DailySeries,
    #[serde(rename = "monthly_avg")]
    pub period_averages: PeriodAverages,
    /// Instant the cycle planned its windows from.
    #[serde(skip)]
    pub generated_at: DateTime<Utc>,
    #[serde(skip)]
    pub stats: AggregateStats,
    /// Set by [`SnapshotStore::replace`]; 0 until published.
    #[serde(skip)]
    pub generation: u64,
}

impl Snapshot {
    /// A snapshot with every tracked quantity present and no devices, the
    /// shape served before the first cycle completes.
    pub fn empty(quantities: &[String], generated_at: DateTime<Utc>) -> Self {
        Self {
            series: quantities
                .iter()
                .map(|q| (q.clone(), BTreeMap::new()))
                .collect(),
            period_averages: BTreeMap::new(),
            generated_at,
            stats: AggregateStats::default(),
            generation: 0,
        }
    }

    pub fn daily(&self, quantity: &str, device: &str) -> Option<&[DailyAverage]> {
        self.series
            .get(quantity)
            .and_then(|devices| devices.get(device))
            .map(Vec::as_slice)
    }

    /// Outer `None`: device or quantity not tracked. Inner `None`: never observed.
    pub fn period_average(&self, device: &str, quantity: &str) -> Option<PeriodAverage> {
        self.period_averages
            .get(device)
            .and_then(|averages| averages.get(quantity))
            .copied()
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.period_averages.keys().map(String::as_str)
    }

    pub fn quantities(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

/// Holds at most one published snapshot.
pub struct SnapshotStore {
    current: ArcSwapOption<Snapshot>,
    /// Serialises writers so generations are installed in order.
    writer: Mutex<()>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            writer: Mutex::new(()),
        }
    }

    /// Install `snapshot` as current and return its generation number.
    ///
    /// Concurrent calls are serialised, so every call gets a distinct
    /// generation and the installed one never goes backwards. Readers are
    /// not affected by the lock.
    pub fn replace(&self, mut snapshot: Snapshot) -> u64 {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.generation() + 1;
        snapshot.generation = generation;
        self.current.store(Some(Arc::new(snapshot)));
        generation
    }

    /// The installed snapshot, or `None` before the first publish.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    pub fn is_populated(&self) -> bool {
        self.current.load().is_some()
    }

    /// Number of snapshots installed so far.
    pub fn generation(&self) -> u64 {
        let current = self.current.load();
        (*current)
            .as_ref()
            .map_or(0, |snapshot| snapshot.generation)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DEVICES: &[&str] = &["D250AC01", "D250AC02", "D250AC03", "D250AC04"];

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    /// Every device carries `marker` so a mixed read is detectable.
    fn marked(marker: f64) -> Snapshot {
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let mut snapshot = Snapshot::empty(&["energy".to_string()], t0());
        for device in DEVICES {
            snapshot
                .series
                .get_mut("energy")
                .unwrap()
                .insert(device.to_string(), vec![DailyAverage { day, value: marker }]);
            snapshot.period_averages.insert(
                device.to_string(),
                BTreeMap::from([("energy".to_string(), Some(marker))]),
            );
        }
        snapshot
    }

    // -----------------------------------------------------------------------
    // Snapshot shape
    // -----------------------------------------------------------------------

    #[test]
    fn test_empty_has_every_quantity() {
        let quantities = vec!["energy".to_string(), "humidity".to_string()];
        let snapshot = Snapshot::empty(&quantities, t0());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"energy": {}, "humidity": {}, "monthly_avg": {}})
        );
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(marked(2.5)).unwrap();
        assert_eq!(json["energy"]["D250AC01"][0]["day"], "2025-03-01");
        assert_eq!(json["energy"]["D250AC01"][0]["value"], 2.5);
        assert_eq!(json["monthly_avg"]["D250AC03"]["energy"], 2.5);
        assert!(json.get("generated_at").is_none());
        assert!(json.get("generation").is_none());
    }

    #[test]
    fn test_absent_period_average_serializes_null() {
        let mut snapshot = marked(1.0);
        snapshot
            .period_averages
            .get_mut("D250AC01")
            .unwrap()
            .insert("humidity".to_string(), None);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["monthly_avg"]["D250AC01"]["humidity"].is_null());
        assert_eq!(snapshot.period_average("D250AC01", "humidity"), Some(None));
        assert_eq!(snapshot.period_average("D250AC01", "co2"), None);
    }

    #[test]
    fn test_accessors() {
        let snapshot = marked(4.0);
        assert_eq!(snapshot.daily("energy", "D250AC02").unwrap().len(), 1);
        assert!(snapshot.daily("energy", "unknown").is_none());
        assert_eq!(snapshot.devices().count(), DEVICES.len());
        assert_eq!(snapshot.quantities().collect::<Vec<_>>(), vec!["energy"]);
    }

    // -----------------------------------------------------------------------
    // Store semantics
    // -----------------------------------------------------------------------

    #[test]
    fn test_store_starts_unpopulated() {
        let store = SnapshotStore::new();
        assert!(store.current().is_none());
        assert!(!store.is_populated());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_replace_installs_and_numbers() {
        let store = SnapshotStore::new();
        assert_eq!(store.replace(marked(1.0)), 1);
        assert_eq!(store.replace(marked(2.0)), 2);
        let current = store.current().unwrap();
        assert_eq!(current.generation, 2);
        assert_eq!(current.period_average("D250AC01", "energy"), Some(Some(2.0)));
    }

    #[test]
    fn test_reader_keeps_old_snapshot_alive() {
        let store = SnapshotStore::new();
        store.replace(marked(1.0));
        let held = store.current().unwrap();
        store.replace(marked(2.0));
        assert_eq!(held.period_average("D250AC01", "energy"), Some(Some(1.0)));
        assert_eq!(held.generation, 1);
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_generations() {
        let store = Arc::new(SnapshotStore::new());
        store.replace(marked(0.0));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        let snapshot = store.current().expect("populated before readers start");
                        let marker = snapshot.generation as f64 - 1.0;
                        for device in DEVICES {
                            assert_eq!(
                                snapshot.period_average(device, "energy"),
                                Some(Some(marker)),
                                "device {device} from a different generation"
                            );
                            assert_eq!(snapshot.daily("energy", device).unwrap()[0].value, marker);
                        }
                    }
                })
            })
            .collect();

        for generation in 1..=2_000u64 {
            store.replace(marked(generation as f64));
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.generation(), 2_001);
    }

    #[test]
    fn test_concurrent_writers_get_distinct_generations() {
        let store = Arc::new(SnapshotStore::new());

        let writers: Vec<_> = (0..8u32)
            .map(|w| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..250u32)
                        .map(|i| store.replace(marked(f64::from(w * 1000 + i))))
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for writer in writers {
            let mine = writer.join().unwrap();
            assert!(mine.windows(2).all(|pair| pair[0] < pair[1]));
            all.extend(mine);
        }
        all.sort_unstable();
        assert_eq!(all, (1..=2_000).collect::<Vec<u64>>());
        assert_eq!(store.generation(), 2_000);
        assert_eq!(store.current().unwrap().generation, 2_000);
    }
}
