use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Extension, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use relay_shared::attachments::{
    Attachment, DocumentTextExtractor, PreparedAttachments, prepare_attachments,
};
use relay_shared::conversation::ConversationStore;
use relay_shared::llm::{
    LlmExecutionSource, LlmTextStream, log_llm_telemetry, stream_telemetry,
};
use relay_shared::models::{StreamEvent, StreamGenerateRequest};
use relay_shared::relay::{ConversationCommit, RelayError, RelayExchange};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, Span, error, info, warn};

use super::AppState;
use super::errors::{
    GENERATION_FAILED_MESSAGE, internal_error_response, relay_error_response,
};
use super::observability::RequestContext;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const EVENT_CHANNEL_CAPACITY: usize = 16;
const STREAM_SOURCE: LlmExecutionSource = LlmExecutionSource::ApiGenerateStream;

pub(super) async fn generate_stream(
    State(state): State<AppState>,
    Extension(request_context): Extension<RequestContext>,
    Json(request): Json<StreamGenerateRequest>,
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

    let prepared = match prepare_attachments_off_thread(
        Arc::clone(&state.document_extractor),
        exchange.take_attachments(),
    )
    .await
    {
        Ok(prepared) => prepared,
        Err(response) => {
            exchange.fail();
            return response;
        }
    };

    let llm_request = match exchange.assemble(prepared) {
        Ok(llm_request) => llm_request,
        Err(err) => return relay_error_response(err),
    };

    let started_at = Instant::now();
    let upstream = match state.llm_gateway.stream(llm_request).await {
        Ok(upstream) => upstream,
        Err(err) => {
            exchange.fail();
            let telemetry = stream_telemetry(STREAM_SOURCE, exchange.mode(), started_at, Err(&err));
            log_llm_telemetry(&request_id, &telemetry);
            return internal_error_response(GENERATION_FAILED_MESSAGE);
        }
    };

    if let Err(err) = exchange.begin_streaming() {
        return relay_error_response(err);
    }

    let (event_tx, event_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(
        relay_upstream(
            Arc::clone(&state.conversations),
            exchange,
            upstream,
            event_tx,
            request_id,
            started_at,
        )
        .instrument(Span::current()),
    );

    let events = ReceiverStream::new(event_rx).map(Ok::<Event, Infallible>);
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response()
}

async fn relay_upstream(
    conversations: Arc<dyn ConversationStore>,
    mut exchange: RelayExchange,
    mut upstream: LlmTextStream,
    events: mpsc::Sender<Event>,
    request_id: String,
    started_at: Instant,
) {
    let mode = exchange.mode();
    info!(
        request_id = %request_id,
        mode = mode.as_str(),
        attachments = exchange.attachment_count(),
        "relay stream started"
    );

    loop {
        let next = tokio::select! {
            next = upstream.next() => next,
            () = events.closed() => {
                exchange.fail();
                info!(request_id = %request_id, "client disconnected; relay abandoned without commit");
                return;
            }
        };

        match next {
            Some(Ok(fragment)) => {
                exchange.record_fragment(&fragment);
                if events.send(sse_event(&StreamEvent::delta(fragment))).await.is_err() {
                    exchange.fail();
                    info!(request_id = %request_id, "client disconnected; relay abandoned without commit");
                    return;
                }
            }
            Some(Err(err)) => {
                exchange.fail();
                let telemetry = stream_telemetry(STREAM_SOURCE, mode, started_at, Err(&err));
                log_llm_telemetry(&request_id, &telemetry);
                warn!(request_id = %request_id, "upstream failed mid-stream: {err}");

                let message = format!("Generation interrupted: {err}");
                let _ = events.send(sse_event(&StreamEvent::error(message))).await;
                return;
            }
            None => break,
        }
    }

    let full_text = exchange.accumulated_text().to_string();
    let telemetry = stream_telemetry(STREAM_SOURCE, mode, started_at, Ok(&full_text));
    log_llm_telemetry(&request_id, &telemetry);

    if events.is_closed() {
        exchange.fail();
        info!(request_id = %request_id, "client disconnected before completion; relay abandoned");
        return;
    }

    // The window is stored before `done` goes out, so a follow-up turn sent
    // on `done` reads it.
    match exchange.complete() {
        Ok(Some(commit)) => commit_window(conversations.as_ref(), commit, &request_id).await,
        Ok(None) => {}
        Err(err) => {
            error!(request_id = %request_id, "relay completion rejected: {err}");
            let _ = events
                .send(sse_event(&StreamEvent::error(GENERATION_FAILED_MESSAGE)))
                .await;
            return;
        }
    }

    if events.send(sse_event(&StreamEvent::done(full_text))).await.is_err() {
        info!(request_id = %request_id, "client disconnected before the done event");
    }
}

async fn commit_window(
    conversations: &dyn ConversationStore,
    commit: ConversationCommit,
    request_id: &str,
) {
    let turn_count = commit.turns.len();
    match conversations
        .replace(&commit.conversation_id, commit.turns)
        .await
    {
        Ok(()) => info!(request_id, turn_count, "conversation window committed"),
        Err(err) => warn!(request_id, "failed to commit conversation window: {err}"),
    }
}

/// Attachment preprocessing may run PDF extraction, which blocks.
async fn prepare_attachments_off_thread(
    extractor: Arc<dyn DocumentTextExtractor>,
    attachments: Vec<Attachment>,
) -> Result<PreparedAttachments, Response> {
    if attachments.is_empty() {
        return Ok(PreparedAttachments::default());
    }

    let joined =
        tokio::task::spawn_blocking(move || prepare_attachments(&attachments, extractor.as_ref()))
            .await;

    match joined {
        Ok(Ok(prepared)) => Ok(prepared),
        Ok(Err(err)) => Err(relay_error_response(RelayError::Attachment(err))),
        Err(join_err) => {
            error!("attachment preprocessing task failed: {join_err}");
            Err(internal_error_response("Unexpected server error"))
        }
    }
}

fn sse_event(event: &StreamEvent) -> Event {
    match Event::default().json_data(event) {
        Ok(event) => event,
        Err(err) => {
            error!("failed to encode stream event: {err}");
            Event::default().data(r#"{"error":"Failed to encode stream event"}"#)
        }
    }
}
