//! Remote telemetry sources.
//!
//! Every source implements the [`TelemetrySource`] trait: fetch the rows of
//! one half-open window, or fail. Sources never retry; the scheduler decides
//! what happens after a failure.

use std::future::Future;

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{ConfigError, FetchError};
use crate::record::{FieldMap, TelemetryRecord};
use crate::window::TimeWindow;

/// Default cap on rows requested per window.
pub const DEFAULT_MAX_RESULTS: usize = 500_000;

/// Instant format of the remote `_created` filter.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Trait that every telemetry source must implement.
pub trait TelemetrySource: Send + Sync {
    /// Short label used in log lines.
    fn name(&self) -> &str;

    /// Rows created within `[window.start, window.end)`.
    fn fetch(
        &self,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Vec<TelemetryRecord>, FetchError>> + Send;
}

/// Eve-style REST source: `GET <base>?where=<filter>&max_results=<n>`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: Url,
    max_results: usize,
    fields: FieldMap,
}

/// Top-level response document; only `_items` is required.
#[derive(Debug, Deserialize)]
struct ItemsPage {
    #[serde(rename = "_items")]
    items: Vec<Value>,
    #[serde(rename = "_meta", default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    total: Option<u64>,
}

impl HttpSource {
    pub fn new(
        base_url: &str,
        fields: FieldMap,
        max_results: usize,
        timeout: std::time::Duration,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url {base_url:?}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            max_results,
            fields,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(
            &config.base_url,
            config.fields.covering(&config.quantities),
            config.max_results,
            config.request_timeout,
        )
    }

    /// Full request URL for `window`.
    pub fn query_url(&self, window: &TimeWindow) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("where", &where_clause(window))
            .append_pair("max_results", &self.max_results.to_string());
        url
    }
}

impl TelemetrySource for HttpSource {
    fn name(&self) -> &str {
        self.base_url.as_str()
    }

    async fn fetch(&self, window: &TimeWindow) -> Result<Vec<TelemetryRecord>, FetchError> {
        let url = self.query_url(window);
        log::debug!("GET {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(FetchError::Transport)?;
        let page: ItemsPage = serde_json::from_slice(&body)?;

        if let Some(total) = page.meta.and_then(|m| m.total)
            && total > page.items.len() as u64
        {
            log::warn!(
                "{window}: remote reports {total} rows but returned {}; raise max_results",
                page.items.len()
            );
        }

        Ok(page
            .items
            .iter()
            .map(|item| TelemetryRecord::from_json(item, &self.fields))
            .collect())
    }
}

/// `{"$and":[{"_created":{"$gte":start}},{"_created":{"$lt":end}}]}`
fn where_clause(window: &TimeWindow) -> String {
    serde_json::json!({
        "$and": [
            {"_created": {"$gte": window.start.format(HTTP_DATE_FORMAT).to_string()}},
            {"_created": {"$lt": window.end.format(HTTP_DATE_FORMAT).to_string()}},
        ]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 2, 17, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap(),
        )
    }

    fn source(base: &str) -> HttpSource {
        HttpSource::new(base, FieldMap::default(), 1000, Duration::from_secs(5)).unwrap()
    }

    /// Serve `router` on an ephemeral local port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/energygrid2")
    }

    // -----------------------------------------------------------------------
    // Query construction
    // -----------------------------------------------------------------------

    #[test]
    fn test_where_clause_half_open() {
        let clause: Value = serde_json::from_str(&where_clause(&window())).unwrap();
        assert_eq!(
            clause["$and"][0]["_created"]["$gte"],
            "Mon, 17 Feb 2025 12:00:00 GMT"
        );
        assert_eq!(
            clause["$and"][1]["_created"]["$lt"],
            "Tue, 04 Mar 2025 12:00:00 GMT"
        );
    }

    #[test]
    fn test_query_url_params() {
        let url = source("http://10.0.0.5:5000/energygrid2").query_url(&window());
        assert_eq!(url.path(), "/energygrid2");
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["max_results"], "1000");
        assert_eq!(params["where"], where_clause(&window()));
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpSource::new("not a url", FieldMap::default(), 1, Duration::from_secs(1));
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    // -----------------------------------------------------------------------
    // Fetching against a local server
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_fetch_decodes_items() {
        let seen: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::default();
        let router = Router::new()
            .route(
                "/energygrid2",
                get(
                    |State(seen): State<Arc<Mutex<Vec<HashMap<String, String>>>>>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        seen.lock().unwrap().push(params);
                        Json(serde_json::json!({
                            "_items": [
                                {"Device_ID": "D250AC01", "Time_Stamp": "2025-03-01 10:00:00",
                                 "unit_consumption": 1.5, "Temperature": 20.0},
                                {"Time_Stamp": "2025-03-01 11:00:00", "unit_consumption": 9.0},
                            ],
                            "_meta": {"total": 2, "max_results": 1000, "page": 1},
                        }))
                    },
                ),
            )
            .with_state(Arc::clone(&seen));
        let base = serve(router).await;

        let records = source(&base).fetch(&window()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_id.as_deref(), Some("D250AC01"));
        assert_eq!(records[0].quantity("energy"), Some(1.5));
        assert_eq!(records[0].quantity("humidity"), None);
        assert!(records[1].validate().is_err());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["max_results"], "1000");
        assert!(seen[0]["where"].contains("$gte"));
    }

    #[tokio::test]
    async fn test_fetch_empty_items_is_ok() {
        let router = Router::new().route(
            "/energygrid2",
            get(|| async { Json(serde_json::json!({"_items": []})) }),
        );
        let base = serve(router).await;
        assert!(source(&base).fetch(&window()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let router = Router::new().route(
            "/energygrid2",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(router).await;
        let err = source(&base).fetch(&window()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_fetch_unexpected_schema() {
        let router = Router::new().route(
            "/energygrid2",
            get(|| async { Json(serde_json::json!({"items": []})) }),
        );
        let base = serve(router).await;
        let err = source(&base).fetch(&window()).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn test_fetch_times_out_on_hanging_remote() {
        let router = Router::new().route(
            "/energygrid2",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(serde_json::json!({"_items": []}))
            }),
        );
        let base = serve(router).await;
        let source =
            HttpSource::new(&base, FieldMap::default(), 10, Duration::from_millis(300)).unwrap();

        let started = std::time::Instant::now();
        let err = source.fetch(&window()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, FetchError::Transport(ref e) if e.is_timeout()), "{err}");
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = source(&format!("http://{addr}/energygrid2"))
            .fetch(&window())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
