use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use relay_shared::models::ErrorResponse;
use relay_shared::relay::RelayError;
use tracing::error;

pub(super) const GENERATION_FAILED_MESSAGE: &str = "Failed to generate content";

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

pub(super) fn bad_request_response(message: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, message)
}

pub(super) fn not_found_response(message: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, message)
}

pub(super) fn internal_error_response(message: &str) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
}

pub(super) fn service_unavailable_response(message: &str) -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, message)
}

pub(super) fn too_many_requests_response(retry_after_seconds: u64) -> Response {
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "Too many requests; retry later",
    );

    if let Ok(retry_after_value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, retry_after_value);
    }

    response
}

pub(super) fn relay_error_response(err: RelayError) -> Response {
    match err {
        RelayError::EmptyRequest => bad_request_response(&err.to_string()),
        RelayError::Attachment(attachment_err) => {
            bad_request_response(&format!("invalid attachment: {attachment_err}"))
        }
        RelayError::Store(store_err) => {
            error!("conversation store operation failed: {store_err}");
            internal_error_response("Conversation store unavailable")
        }
        RelayError::InvalidTransition { .. } => {
            error!("relay state machine violated: {err}");
            internal_error_response("Unexpected server error")
        }
    }
}
