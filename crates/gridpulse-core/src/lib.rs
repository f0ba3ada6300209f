//! # gridpulse-core
//!
//! **Keeps a consistent picture of the last month of device telemetry.**
//!
//! `gridpulse-core` periodically pulls raw telemetry rows (energy consumption,
//! temperature, humidity) for a fixed set of devices from a remote REST source,
//! reduces them to per-device daily averages and period averages, and publishes
//! the result as a single immutable [`Snapshot`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use gridpulse_core::{Config, HttpSource, Scheduler, SnapshotStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let store = Arc::new(SnapshotStore::new());
//! let source = HttpSource::from_config(&config)?;
//! let scheduler = Scheduler::from_config(source, &config, Arc::clone(&store))?;
//!
//! // Runs until the token is cancelled.
//! scheduler.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Scheduler → WindowPlanner → TelemetrySource → Aggregator → SnapshotStore
//!
//! - [`WindowPlanner`] splits the trailing horizon into adjacent half-open
//!   windows so that no single request exceeds the remote record cap.
//! - [`TelemetrySource`] fetches the rows of one window. [`HttpSource`] speaks
//!   the Eve-style `where=` query contract.
//! - [`Aggregator`] groups rows by device and UTC calendar day.
//! - [`SnapshotStore`] swaps whole snapshots atomically; readers never wait
//!   on the writer and never see a half-built result.
//! - [`Scheduler`] runs one cycle at a time and keeps the previous snapshot
//!   published whenever a cycle fails.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod record;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod window;

pub use aggregate::{AggregateStats, Aggregator};
pub use config::{Config, format_duration, parse_duration};
pub use error::{ConfigError, CycleError, FetchError, MalformedRecordError};
pub use record::{FieldMap, TelemetryRecord};
pub use scheduler::{CycleReport, Scheduler, SchedulerState, SchedulerStatus, StatusBoard};
pub use snapshot::{DailyAverage, PeriodAverage, Snapshot, SnapshotStore};
pub use source::{HttpSource, TelemetrySource};
pub use window::{TimeWindow, WindowPlanner};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
