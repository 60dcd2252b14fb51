use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const MAX_REQUEST_ID_LEN: usize = 128;
const METRIC_NAME: &str = "relay_http_request";

#[derive(Clone, Debug)]
pub(super) struct RequestContext {
    pub(super) request_id: String,
}

/// Wraps every request in a `relay_request` span carrying the request id, so
/// work spawned on its behalf (the stream relay task) logs under the same id.
pub(super) async fn request_observability_middleware(mut req: Request, next: Next) -> Response {
    let request_id = resolve_request_id(req.headers());
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let span = info_span!(
        "relay_request",
        request_id = %request_id,
        method = %req.method(),
        route = %route,
    );
    req.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let started_at = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    span.in_scope(|| log_response(&response, started_at.elapsed()));
    response
}

fn log_response(response: &Response, elapsed: Duration) {
    let status = response.status().as_u16();
    let latency_ms = elapsed.as_millis() as u64;

    if is_event_stream(response.headers()) {
        // The body is still being produced; this is time to headers only.
        info!(
            status,
            time_to_headers_ms = latency_ms,
            metric_name = METRIC_NAME,
            "relay event stream opened"
        );
    } else if response.status().is_server_error() {
        warn!(
            status,
            latency_ms,
            metric_name = METRIC_NAME,
            "relay request completed with server error"
        );
    } else {
        info!(
            status,
            latency_ms,
            metric_name = METRIC_NAME,
            "relay request completed"
        );
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

fn resolve_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(normalize_request_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn normalize_request_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_REQUEST_ID_LEN {
        return None;
    }

    trimmed
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.'))
        .then(|| trimmed.to_string())
}
