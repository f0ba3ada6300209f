//! HTTP query endpoint for the latest aggregation snapshot.
//!
//! Serves `/energy-data` in the shape the calendar dashboard consumes:
//! `{"<quantity>": {"<device>": [{"day", "value"}]}, "monthly_avg": {...}}`.
//! Handlers only ever read the published snapshot, so a request never waits
//! on a refresh in progress.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use gridpulse_core::{
    AggregateStats, Config, ConfigError, SchedulerStatus, Snapshot, SnapshotStore, StatusBoard,
};

/// A snapshot older than this many refresh intervals is reported stale.
const STALE_AFTER_INTERVALS: i32 = 3;

/// Shared server state.
pub struct AppState {
    store: Arc<SnapshotStore>,
    status: StatusBoard,
    devices: Vec<String>,
    quantities: Vec<String>,
    cors_origin: Option<HeaderValue>,
    stale_after: TimeDelta,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<SnapshotStore>,
        status: StatusBoard,
    ) -> Result<Self, ConfigError> {
        let cors_origin = config
            .cors_origin
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| ConfigError::Invalid(format!("cors_origin: {e}")))?;
        let stale_after = TimeDelta::from_std(config.refresh_interval)
            .ok()
            .and_then(|interval| interval.checked_mul(STALE_AFTER_INTERVALS))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "refresh_interval {:?} is too large",
                    config.refresh_interval
                ))
            })?;
        Ok(Self {
            store,
            status,
            devices: config.devices.clone(),
            quantities: config.quantities.clone(),
            cors_origin,
            stale_after,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Freshness {
    /// Nothing published yet.
    Pending,
    Ok,
    Stale,
}

#[derive(Serialize)]
struct HealthResponse {
    status: Freshness,
    generation: u64,
    generated_at: Option<DateTime<Utc>>,
    records: Option<AggregateStats>,
    scheduler: SchedulerStatus,
}

fn freshness(snapshot: Option<&Snapshot>, now: DateTime<Utc>, stale_after: TimeDelta) -> Freshness {
    match snapshot {
        None => Freshness::Pending,
        Some(s) if now - s.generated_at > stale_after => Freshness::Stale,
        Some(_) => Freshness::Ok,
    }
}

async fn handle_energy_data(State(state): State<Arc<AppState>>) -> Response {
    let mut response = match state.store.current() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => Json(Snapshot::empty(&state.quantities, Utc::now())).into_response(),
    };
    if let Some(origin) = &state.cors_origin {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    }
    response
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.store.current();
    Json(HealthResponse {
        status: freshness(snapshot.as_deref(), Utc::now(), state.stale_after),
        generation: snapshot.as_ref().map_or(0, |s| s.generation),
        generated_at: snapshot.as_ref().map(|s| s.generated_at),
        records: snapshot.as_ref().map(|s| s.stats),
        scheduler: state.status.get(),
    })
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "gridpulse",
        "version": gridpulse_core::VERSION,
        "devices": state.devices,
        "quantities": state.quantities,
        "endpoints": {
            "/": "This API index",
            "/energy-data": "Daily averages per quantity and device, plus monthly_avg per device",
            "/health": "Snapshot freshness and refresh loop status",
        },
    }))
}

/// Build the axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/energy-data", get(handle_energy_data))
        .route("/health", get(handle_health))
        .with_state(Arc::new(state))
}

/// Serve `router` on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    log::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Bind `addr` and run the query endpoint until `shutdown` fires.
pub async fn run_server(
    router: Router,
    addr: &str,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, router, shutdown).await
}
