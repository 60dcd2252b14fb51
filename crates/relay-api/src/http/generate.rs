use axum::Json;
use axum::extract::{Extension, State};
use axum::response::{IntoResponse, Response};
use relay_shared::attachments::PreparedAttachments;
use relay_shared::llm::{LlmExecutionSource, complete_with_telemetry, log_llm_telemetry};
use relay_shared::models::{GenerateRequest, GenerateResponse};
use relay_shared::relay::RelayExchange;
use tracing::{info, warn};

use super::AppState;
use super::errors::{GENERATION_FAILED_MESSAGE, internal_error_response, relay_error_response};
use super::observability::RequestContext;

const EMPTY_COMPLETION_FALLBACK: &str = "No response generated.";

pub(super) async fn generate(
    State(state): State<AppState>,
    Extension(request_context): Extension<RequestContext>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    let request_id = request_context.request_id;

    let mut exchange = match RelayExchange::receive(request.into()) {
        Ok(exchange) => exchange,
        Err(err) => return relay_error_response(err),
    };
    if let Err(err) = exchange
        .resolve_history(state.conversations.as_ref())
        .await
    {
        return relay_error_response(err);
    }

    let llm_request = match exchange.assemble(PreparedAttachments::default()) {
        Ok(llm_request) => llm_request,
        Err(err) => return relay_error_response(err),
    };
    if let Err(err) = exchange.begin_streaming() {
        return relay_error_response(err);
    }

    let (result, telemetry) = complete_with_telemetry(
        state.llm_gateway.as_ref(),
        LlmExecutionSource::ApiGenerate,
        llm_request,
    )
    .await;
    log_llm_telemetry(&request_id, &telemetry);

    let completion = match result {
        Ok(completion) => completion,
        Err(err) => {
            exchange.fail();
            warn!(request_id = %request_id, "generation failed: {err}");
            return internal_error_response(GENERATION_FAILED_MESSAGE);
        }
    };

    let text = if completion.text.trim().is_empty() {
        EMPTY_COMPLETION_FALLBACK.to_string()
    } else {
        completion.text
    };
    exchange.record_fragment(&text);

    let commit = match exchange.complete() {
        Ok(commit) => commit,
        Err(err) => return relay_error_response(err),
    };
    if let Some(commit) = commit {
        let turn_count = commit.turns.len();
        match state
            .conversations
            .replace(&commit.conversation_id, commit.turns)
            .await
        {
            Ok(()) => info!(
                request_id = %request_id,
                turn_count,
                "conversation window committed"
            ),
            Err(err) => warn!(
                request_id = %request_id,
                "failed to commit conversation window: {err}"
            ),
        }
    }

    Json(GenerateResponse {
        result: text,
        conversation_id: exchange.conversation_id().map(ToString::to_string),
    })
    .into_response()
}
