use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    http::{header::CONTENT_LENGTH, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use metrics::gauge;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

const METRIC_HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
const METRIC_HTTP_REQUESTS_DURATION_SECONDS: &str = "http_requests_duration_seconds";
const METRIC_HTTP_REQUEST_SIZE_BYTES: &str = "http_request_size_bytes";
const METRIC_HTTP_RESPONSE_SIZE_BYTES: &str = "http_response_size_bytes";
const METRIC_HTTP_ACTIVE_REQUESTS: &str = "http_active_requests";

// Global atomic counter for in-flight instrumented requests
static ACTIVE_REQUESTS: AtomicUsize = AtomicUsize::new(0);

// Guard to ensure the in-flight count is decremented even on panic
struct RequestGuard;

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let in_flight = ACTIVE_REQUESTS
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        gauge!(
            METRIC_HTTP_ACTIVE_REQUESTS,
            "lifecycle" => health::get_lifecycle_state().as_str()
        )
        .set(in_flight as f64);
    }
}

/// Correlation identifier for one request, available to handlers through
/// request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Inbound `X-Request-ID` taken verbatim when present and non-empty,
/// otherwise a fresh random id.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Middleware wrapping every business route: assigns the correlation id,
/// opens a trace span named after the method and route, and records one
/// metric sample when the handler returns. The handler's response passes
/// through untouched.
/// Someday tower-http might provide a metrics middleware: https://github.com/tower-rs/tower-http/issues/57
pub async fn track_requests(mut req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();
    let request_bytes = content_length(req.headers());

    let request_id = correlation_id(req.headers());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let in_flight = ACTIVE_REQUESTS.fetch_add(1, Ordering::Relaxed) + 1;
    gauge!(
        METRIC_HTTP_ACTIVE_REQUESTS,
        "lifecycle" => health::get_lifecycle_state().as_str()
    )
    .set(in_flight as f64);
    let _guard = RequestGuard;

    let span = tracing::info_span!(
        "request",
        otel.name = %format!("{method} {path}"),
        http.method = %method,
        http.route = %path,
        request.id = %request_id,
    );

    // Run the rest of the request handling first, so we can measure it and
    // get response codes.
    let response = next.run(req).instrument(span).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let response_bytes = content_length(response.headers());

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!(METRIC_HTTP_REQUESTS_TOTAL, &labels).increment(1);
    metrics::histogram!(METRIC_HTTP_REQUESTS_DURATION_SECONDS, &labels).record(latency);
    metrics::histogram!(METRIC_HTTP_REQUEST_SIZE_BYTES, &labels).record(request_bytes as f64);
    metrics::histogram!(METRIC_HTTP_RESPONSE_SIZE_BYTES, &labels).record(response_bytes as f64);

    response
}
