use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use relay_shared::models::{ConversationHistoryResponse, MessageResponse};
use tracing::{error, info};

use super::AppState;
use super::errors::{internal_error_response, not_found_response};

pub(super) async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    match state.conversations.load(&conversation_id).await {
        Ok(Some(history)) => Json(ConversationHistoryResponse { history }).into_response(),
        Ok(None) => not_found_response("Conversation not found"),
        Err(err) => {
            error!("failed to load conversation: {err}");
            internal_error_response("Conversation store unavailable")
        }
    }
}

pub(super) async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    match state.conversations.delete(&conversation_id).await {
        Ok(removed) => {
            info!(removed, "conversation delete requested");
            Json(MessageResponse {
                message: "Conversation deleted".to_string(),
            })
            .into_response()
        }
        Err(err) => {
            error!("failed to delete conversation: {err}");
            internal_error_response("Conversation store unavailable")
        }
    }
}
