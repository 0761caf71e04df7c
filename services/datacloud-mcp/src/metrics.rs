//! Prometheus metrics exposition
//!
//! - `datacloud_tool_calls_total` (counter): labels `tool`, `status`
//! - `datacloud_tool_call_duration_seconds` (histogram): label `tool`
//!
//! The auth and gateway crates record `datacloud_auth_refreshes_total`,
//! `datacloud_auth_logins_total` and `datacloud_gateway_retries_total`
//! into the same recorder.

use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const TOOL_CALL_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Builder with histogram buckets for tool call latency, so the duration
/// renders `_bucket` lines instead of a summary. Queries can run for minutes.
fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("datacloud_tool_call_duration_seconds".to_string()),
        TOOL_CALL_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record one finished `tools/call`. `status` is `ok`, `tool_error` or `invalid`.
pub fn record_tool_call(tool: &str, status: &str, duration_secs: f64) {
    metrics::counter!("datacloud_tool_calls_total", "tool" => tool.to_string(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!("datacloud_tool_call_duration_seconds", "tool" => tool.to_string())
        .record(duration_secs);
}

/// `GET /metrics` in the Prometheus text format.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(handle)
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
