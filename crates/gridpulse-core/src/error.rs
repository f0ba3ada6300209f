//! Error taxonomy for the refresh pipeline.
//!
//! Only [`ConfigError`] ever reaches a caller outside the pipeline. Fetch and
//! cycle errors are absorbed by the scheduler, and malformed rows are skipped
//! one at a time.

use std::path::PathBuf;

use thiserror::Error;

use crate::window::TimeWindow;

/// Failure to obtain one window of rows from the remote source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The remote answered with a non-success HTTP status.
    #[error("remote returned HTTP {status}")]
    Status { status: u16 },

    /// The response body is not the expected `_items` document.
    #[error("unparseable response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A single row that cannot be attributed to a device and an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedRecordError {
    #[error("record has no device id")]
    MissingDeviceId,

    #[error("record has no usable timestamp")]
    MissingTimestamp,
}

/// One refresh cycle was abandoned; the previous snapshot stays published.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetching {window} failed: {source}")]
    Fetch {
        window: TimeWindow,
        #[source]
        source: FetchError,
    },

    #[error("aggregation panicked: {0}")]
    Aggregation(String),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
