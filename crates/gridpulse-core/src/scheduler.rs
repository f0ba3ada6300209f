//! The refresh loop.
//!
//! One cycle walks `Idle → Fetching → Aggregating → Publishing → Idle`. Any
//! failure drops the cycle back to `Idle` and leaves the published snapshot
//! untouched. Cycles never overlap: the pause before the next one only starts
//! after the current one has finished, however long it took.
//!
//! [`Scheduler::run_cycle`] takes `now` explicitly so a cycle can be driven
//! from tests without a clock or sleeps.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{AggregateStats, Aggregator};
use crate::config::{Config, format_duration};
use crate::error::{ConfigError, CycleError};
use crate::snapshot::SnapshotStore;
use crate::source::TelemetrySource;
use crate::window::WindowPlanner;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Fetching,
    Aggregating,
    Publishing,
}

/// Observable scheduler progress, for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub cycles_attempted: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Shared handle to a [`SchedulerStatus`].
#[derive(Debug, Clone, Default)]
pub struct StatusBoard(Arc<Mutex<SchedulerStatus>>);

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current status.
    pub fn get(&self) -> SchedulerStatus {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update(&self, f: impl FnOnce(&mut SchedulerStatus)) {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn set_state(&self, state: SchedulerState) {
        self.update(|s| s.state = state);
    }
}

/// Summary of a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub windows: usize,
    pub records: AggregateStats,
    pub generation: u64,
}

/// Drives fetch → aggregate → publish cycles against one source.
pub struct Scheduler<S> {
    source: S,
    planner: WindowPlanner,
    aggregator: Aggregator,
    store: Arc<SnapshotStore>,
    refresh_interval: Duration,
    retry_delay: Duration,
    status: StatusBoard,
}

impl<S: TelemetrySource> Scheduler<S> {
    /// A scheduler with 5 minute refresh and retry delays.
    pub fn new(
        source: S,
        planner: WindowPlanner,
        aggregator: Aggregator,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            source,
            planner,
            aggregator,
            store,
            refresh_interval: Duration::from_secs(300),
            retry_delay: Duration::from_secs(300),
            status: StatusBoard::new(),
        }
    }

    pub fn from_config(
        source: S,
        config: &Config,
        store: Arc<SnapshotStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(source, config.planner()?, config.aggregator(), store)
            .with_delays(config.refresh_interval, config.retry_delay))
    }

    /// Pause after a successful cycle and after a failed one.
    pub fn with_delays(mut self, refresh_interval: Duration, retry_delay: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self.retry_delay = retry_delay;
        self
    }

    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// How long to wait after a cycle that ended with `outcome`.
    pub fn next_delay(&self, outcome: &Result<CycleReport, CycleError>) -> Duration {
        match outcome {
            Ok(_) => self.refresh_interval,
            Err(_) => self.retry_delay,
        }
    }

    /// Run one cycle as of `now`. On error the published snapshot is unchanged.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        self.status.update(|s| {
            s.state = SchedulerState::Fetching;
            s.cycles_attempted += 1;
        });

        let outcome = self.execute(now).await;

        self.status.update(|s| {
            s.state = SchedulerState::Idle;
            match &outcome {
                Ok(_) => {
                    s.cycles_succeeded += 1;
                    s.last_success = Some(now);
                }
                Err(e) => {
                    s.cycles_failed += 1;
                    s.last_failure = Some(now);
                    s.last_error = Some(e.to_string());
                }
            }
        });
        outcome
    }

    async fn execute(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let windows = self.planner.plan(now);

        let mut records = Vec::new();
        for window in &windows {
            let batch = self
                .source
                .fetch(window)
                .await
                .map_err(|source| CycleError::Fetch {
                    window: *window,
                    source,
                })?;
            log::debug!("{}: {} rows for {window}", self.source.name(), batch.len());
            records.extend(batch);
        }
        if records.is_empty() {
            log::info!("no rows in the last {}", horizon_label(&self.planner));
        }

        self.status.set_state(SchedulerState::Aggregating);
        let aggregator = &self.aggregator;
        let snapshot = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            aggregator.aggregate(&records, now)
        }))
        .map_err(|panic| CycleError::Aggregation(panic_message(panic.as_ref())))?;
        drop(records);

        let stats = snapshot.stats;
        if stats.malformed > 0 || stats.unknown_device > 0 {
            log::warn!(
                "skipped {} malformed rows and {} rows from unknown devices",
                stats.malformed,
                stats.unknown_device
            );
        }

        self.status.set_state(SchedulerState::Publishing);
        let generation = self.store.replace(snapshot);

        Ok(CycleReport {
            windows: windows.len(),
            records: stats,
            generation,
        })
    }

    /// Run cycles until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!(
            "refreshing from {} every {} ({} windows over {}, retry after {})",
            self.source.name(),
            format_duration(self.refresh_interval),
            self.planner.window_count(),
            horizon_label(&self.planner),
            format_duration(self.retry_delay),
        );

        loop {
            let outcome = tokio::select! {
                outcome = self.run_cycle(Utc::now()) => outcome,
                _ = cancel.cancelled() => break,
            };
            let delay = self.next_delay(&outcome);
            match &outcome {
                Ok(report) => log::info!(
                    "published snapshot #{} ({} rows from {} windows)",
                    report.generation,
                    report.records.accepted,
                    report.windows
                ),
                Err(e) => log::warn!(
                    "refresh failed, keeping previous snapshot; retrying in {}: {e}",
                    format_duration(delay)
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }
        log::info!("scheduler shutting down");
    }
}

fn horizon_label(planner: &WindowPlanner) -> String {
    planner
        .horizon()
        .to_std()
        .map(format_duration)
        .unwrap_or_else(|_| planner.horizon().to_string())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
