//! HTTP handlers.

use crate::metrics::MetricsProvider;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Content type of the Prometheus text exposition format.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// One scrape in the Prometheus text format.
pub async fn metrics<P: MetricsProvider>(State(provider): State<Arc<P>>) -> Response {
    match provider.scrape().await {
        Ok(body) => ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!("Scrape failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, format!("scrape failed: {}\n", e)).into_response()
        }
    }
}

/// One scrape as JSON records.
pub async fn records<P: MetricsProvider>(
    State(provider): State<Arc<P>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match provider.records().await {
        Ok(records) => match serde_json::to_value(&records) {
            Ok(value) => Ok(Json(value)),
            Err(e) => {
                error!("Failed to serialize records: {}", e);
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        Err(e) => {
            error!("Scrape failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "remote-node-exporter",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Remote Node Exporter</title>
</head>
<body>
    <h1>Remote Node Exporter</h1>
    <p>Node metrics gathered from a remote host over SSH.</p>
    <ul>
        <li><a href="/metrics">Metrics</a></li>
        <li><a href="/api/metrics">Metrics as JSON</a></li>
        <li><a href="/api/health">Health</a></li>
    </ul>
</body>
</html>
"#;
