//! Metric names and the Prometheus exporter.
//!
//! Library code records through the `metrics` facade only; without an
//! installed recorder every macro is a no-op.  The server installs the
//! recorder at startup when `observability.metrics` is enabled, labels
//! each request by its route template and serves the rendered text on
//! `/metrics`.

use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "metasync_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "metasync_http_request_duration_seconds";

/// Metadata syncs by outcome (counter). Labels: outcome.
pub const SYNC_OPERATIONS_TOTAL: &str = "metasync_sync_operations_total";

/// Physical deletions handed to the retry executor (counter).
pub const DELETIONS_SCHEDULED_TOTAL: &str = "metasync_deletions_scheduled_total";

/// Individual retry attempts (counter). Labels: action, outcome.
pub const RETRY_ATTEMPTS_TOTAL: &str = "metasync_retry_attempts_total";

/// Jobs reaching a terminal state (counter). Labels: action, result.
pub const JOBS_COMPLETED_TOTAL: &str = "metasync_jobs_completed_total";

/// Operations rejected by a permission hook (counter). Labels: operation.
pub const PERMISSION_DENIALS_TOTAL: &str = "metasync_permission_denials_total";

// -- Recorder -----------------------------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder on first call and return
/// its handle; later calls return the same handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Attach help text to every metric above.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(SYNC_OPERATIONS_TOTAL, "Metadata syncs by outcome");
    describe_counter!(
        DELETIONS_SCHEDULED_TOTAL,
        "Physical object deletions scheduled"
    );
    describe_counter!(RETRY_ATTEMPTS_TOTAL, "Retry executor attempts by outcome");
    describe_counter!(JOBS_COMPLETED_TOTAL, "Retry jobs reaching a terminal state");
    describe_counter!(
        PERMISSION_DENIALS_TOTAL,
        "Operations rejected by permission hooks"
    );
}

// -- HTTP instrumentation -----------------------------------------------------

/// Health checks and scrapes are not counted.
const UNCOUNTED: [&str; 2] = ["/metrics", "/health"];

/// Record request count and latency, labelled by route template.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if UNCOUNTED.contains(&req.uri().path()) {
        return next.run(req).await;
    }
    let route = route_label(req.uri().path());
    let method = req.method().as_str().to_owned();

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed();

    let status = response.status().as_str().to_owned();
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "path" => route,
        "status" => status
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => route)
        .record(elapsed.as_secs_f64());
    response
}

/// Map a request path onto the router's route template.
///
/// Object keys, bucket names and job ids never reach a label; paths the
/// router does not serve collapse into `unmatched`.
fn route_label(path: &str) -> &'static str {
    if let Some(rest) = path.strip_prefix("/r2/") {
        return match rest {
            "send" => "/r2/send",
            _ if rest.starts_with("get/") => "/r2/get/{key}",
            _ => "unmatched",
        };
    }
    if path.starts_with("/store/") {
        return "/store/{path}";
    }
    let Some(rest) = path.strip_prefix("/api/") else {
        return match path {
            "/openapi.json" => "/openapi.json",
            _ => "unmatched",
        };
    };
    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        ["upload-url"] => "/api/upload-url",
        ["objects", _] => "/api/objects/{key}",
        ["objects", _, "sync"] => "/api/objects/{key}/sync",
        ["objects", _, "url"] => "/api/objects/{key}/url",
        ["buckets", _, "objects"] => "/api/buckets/{bucket}/objects",
        ["jobs", _] => "/api/jobs/{id}",
        _ => "unmatched",
    }
}

// -- Exposition ---------------------------------------------------------------

/// `GET /metrics`.  404 when the recorder was never installed.
pub async fn metrics_handler() -> Response {
    let Some(handle) = PROMETHEUS_HANDLE.get() else {
        return (StatusCode::NOT_FOUND, "metrics disabled\n").into_response();
    };
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}

// -- Tests --------------------------------------------------------------------
