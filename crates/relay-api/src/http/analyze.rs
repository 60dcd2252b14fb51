use axum::Json;
use axum::extract::{Extension, State};
use axum::response::{IntoResponse, Response};
use relay_shared::code_review::{
    NO_CODE_MESSAGE, normalize_language, parse_review_reply, review_messages,
    rule_based_review,
};
use relay_shared::llm::{
    LlmExecutionSource, LlmGatewayRequest, complete_with_telemetry, log_llm_telemetry,
};
use relay_shared::models::AnalyzeRequest;
use relay_shared::prompts::FeatureMode;
use tracing::{info, warn};

use super::AppState;
use super::errors::bad_request_response;
use super::observability::RequestContext;

pub(super) async fn analyze(
    State(state): State<AppState>,
    Extension(request_context): Extension<RequestContext>,
    Json(request): Json<AnalyzeRequest>,
) -> Response {
    let request_id = request_context.request_id;
    if request.code.trim().is_empty() {
        return bad_request_response(NO_CODE_MESSAGE);
    }
    let language = normalize_language(request.language.as_deref());

    let llm_request =
        LlmGatewayRequest::new(FeatureMode::Code, review_messages(&request.code, &language));
    let (result, telemetry) = complete_with_telemetry(
        state.llm_gateway.as_ref(),
        LlmExecutionSource::ApiAnalyze,
        llm_request,
    )
    .await;
    log_llm_telemetry(&request_id, &telemetry);

    let review = match result {
        Ok(completion) => match parse_review_reply(&completion.text) {
            Ok(review) => review,
            Err(err) => {
                warn!(
                    request_id = %request_id,
                    language = %language,
                    "review reply unusable, falling back to static checks: {err}"
                );
                rule_based_review(&request.code, &language)
            }
        },
        Err(err) => {
            warn!(
                request_id = %request_id,
                language = %language,
                "review generation failed, falling back to static checks: {err}"
            );
            rule_based_review(&request.code, &language)
        }
    };

    info!(
        request_id = %request_id,
        language = %language,
        findings = review.feedback.len(),
        "code review answered"
    );
    Json(review).into_response()
}
