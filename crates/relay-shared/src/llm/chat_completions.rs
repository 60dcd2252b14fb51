use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::gateway::{
    LlmCompletion, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    LlmStreamFuture, LlmTextStream, LlmTokenUsage,
};
use crate::config::ConfigError;
use crate::config_env::{
    optional_trimmed_env, parse_env_or, parse_http_url_env, parse_optional_env,
};
use crate::models::Turn;
use crate::sse::SseEventDecoder;

const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const STREAM_DONE_SENTINEL: &str = "[DONE]";

#[derive(Clone)]
pub struct ChatCompletionsConfig {
    pub chat_completions_url: String,
    pub api_key: String,
    pub model: String,
    /// Bounds connecting, the wait for response headers, and each gap
    /// between streamed chunks.
    pub timeout_ms: u64,
    pub max_tokens: Option<u32>,
}

impl ChatCompletionsConfig {
    pub fn new(
        chat_completions_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            chat_completions_url: chat_completions_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_tokens: None,
        }
    }

    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(api_key) = optional_trimmed_env("LLM_API_KEY") else {
            return Ok(None);
        };

        let timeout_ms = parse_env_or("LLM_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "LLM_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        Ok(Some(Self {
            chat_completions_url: parse_http_url_env(
                "LLM_CHAT_COMPLETIONS_URL",
                DEFAULT_CHAT_COMPLETIONS_URL,
            )?,
            api_key,
            model: optional_trimmed_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_ms,
            max_tokens: parse_optional_env("LLM_MAX_TOKENS")?,
        }))
    }
}

impl fmt::Debug for ChatCompletionsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsConfig")
            .field("chat_completions_url", &self.chat_completions_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ChatGatewayConfigError {
    #[error("failed to build chat completions http client: {0}")]
    HttpClient(String),
}

#[derive(Clone)]
pub struct ChatCompletionsGateway {
    client: reqwest::Client,
    config: ChatCompletionsConfig,
}

impl ChatCompletionsGateway {
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, ChatGatewayConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| ChatGatewayConfigError::HttpClient(err.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn send(
        &self,
        request: &LlmGatewayRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmGatewayError> {
        let request_body = ChatCompletionsRequestBody {
            model: &self.config.model,
            messages: &request.messages,
            stream,
            max_tokens: self.config.max_tokens,
        };

        let pending = self
            .client
            .post(&self.config.chat_completions_url)
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send();

        let response = tokio::time::timeout(self.timeout(), pending)
            .await
            .map_err(|_| LlmGatewayError::Timeout)?
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(LlmGatewayError::ProviderFailure(format!(
            "status={} code={}",
            status.as_u16(),
            parse_provider_error_code(&body)
        )))
    }
}

impl LlmGateway for ChatCompletionsGateway {
    fn complete<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a> {
        Box::pin(async move {
            let response = self.send(&request, false).await?;
            let header_request_id = header_request_id(response.headers());

            let body = tokio::time::timeout(self.timeout(), response.text())
                .await
                .map_err(|_| LlmGatewayError::Timeout)?
                .map_err(|_| {
                    LlmGatewayError::InvalidProviderPayload(
                        "response_body_read_failed".to_string(),
                    )
                })?;

            let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|_| {
                LlmGatewayError::InvalidProviderPayload("response_json_parse_failed".to_string())
            })?;

            let text = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| LlmGatewayError::InvalidProviderPayload("missing_choice".to_string()))?
                .message
                .content
                .unwrap_or_default();

            Ok(LlmCompletion {
                model: parsed.model.unwrap_or_else(|| self.config.model.clone()),
                provider_request_id: header_request_id.or(parsed.id),
                text,
                usage: parsed.usage.map(|usage| LlmTokenUsage {
                    prompt_tokens: clamp_u64_to_u32(usage.prompt_tokens.unwrap_or(0)),
                    completion_tokens: clamp_u64_to_u32(usage.completion_tokens.unwrap_or(0)),
                    total_tokens: clamp_u64_to_u32(usage.total_tokens.unwrap_or(0)),
                }),
            })
        })
    }

    fn stream<'a>(&'a self, request: LlmGatewayRequest) -> LlmStreamFuture<'a> {
        Box::pin(async move {
            let response = self.send(&request, true).await?;
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_transport_error));

            Ok(parse_completion_stream(body, self.timeout()))
        })
    }
}

/// Turns an SSE body of chat-completion chunks into text fragments.
///
/// Ends at the `[DONE]` sentinel or the end of the body. A gap longer than
/// `idle_timeout` between chunks ends the stream with `Timeout`.
pub fn parse_completion_stream<S>(body: S, idle_timeout: Duration) -> LlmTextStream
where
    S: Stream<Item = Result<Vec<u8>, LlmGatewayError>> + Send + 'static,
{
    let state = ChunkStreamState {
        body: body.boxed(),
        decoder: SseEventDecoder::new(),
        pending: VecDeque::new(),
        failure: None,
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if let Some(err) = state.failure.take() {
                state.finished = true;
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            match tokio::time::timeout(idle_timeout, state.body.next()).await {
                Err(_) => state.fail(LlmGatewayError::Timeout),
                Ok(Some(Ok(chunk))) => match state.decoder.push(&chunk) {
                    Ok(events) => state.accept_events(events),
                    Err(err) => state.fail(LlmGatewayError::InvalidProviderPayload(
                        err.to_string(),
                    )),
                },
                Ok(Some(Err(err))) => state.fail(err),
                Ok(None) => {
                    match state.decoder.finish() {
                        Ok(Some(event)) => state.accept_events(vec![event]),
                        Ok(None) => {}
                        Err(err) => state.fail(LlmGatewayError::InvalidProviderPayload(
                            err.to_string(),
                        )),
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

struct ChunkStreamState {
    body: futures::stream::BoxStream<'static, Result<Vec<u8>, LlmGatewayError>>,
    decoder: SseEventDecoder,
    pending: VecDeque<String>,
    failure: Option<LlmGatewayError>,
    finished: bool,
}

impl ChunkStreamState {
    fn accept_events(&mut self, events: Vec<String>) {
        for data in events {
            if self.finished {
                return;
            }
            if data.trim() == STREAM_DONE_SENTINEL {
                self.finished = true;
                return;
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
                Ok(chunk) => chunk,
                Err(_) => {
                    self.fail(LlmGatewayError::InvalidProviderPayload(
                        "chunk_json_parse_failed".to_string(),
                    ));
                    return;
                }
            };

            if let Some(error) = chunk.error {
                self.fail(LlmGatewayError::ProviderFailure(format!(
                    "stream_error code={}",
                    provider_code_label(error.code)
                )));
                return;
            }

            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .unwrap_or_default();
            if !content.is_empty() {
                self.pending.push_back(content);
            }
        }
    }

    fn fail(&mut self, err: LlmGatewayError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        self.finished = true;
    }
}

#[derive(Serialize)]
struct ChatCompletionsRequestBody<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChatCompletionChunkChoice>,
    error: Option<ProviderErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunkChoice {
    #[serde(default)]
    delta: ChatCompletionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetails {
    code: Option<Value>,
}

fn map_transport_error(err: reqwest::Error) -> LlmGatewayError {
    if err.is_timeout() {
        LlmGatewayError::Timeout
    } else {
        LlmGatewayError::ProviderFailure("request_unavailable".to_string())
    }
}

fn header_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn parse_provider_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ProviderErrorEnvelope {
        error: Option<ProviderErrorDetails>,
    }

    let code = serde_json::from_str::<ProviderErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|details| details.code);
    provider_code_label(code)
}

fn provider_code_label(code: Option<Value>) -> String {
    match code {
        Some(Value::String(code)) => code,
        Some(Value::Number(code)) => code.to_string(),
        _ => "unknown".to_string(),
    }
}

fn clamp_u64_to_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    type ChunkStream = stream::Iter<std::vec::IntoIter<Result<Vec<u8>, LlmGatewayError>>>;

    fn body(chunks: &[&str]) -> ChunkStream {
        let chunks: Vec<Result<Vec<u8>, LlmGatewayError>> = chunks
            .iter()
            .map(|chunk| Ok(chunk.as_bytes().to_vec()))
            .collect();
        stream::iter(chunks)
    }

    fn delta(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    async fn collect(stream: LlmTextStream) -> Vec<Result<String, LlmGatewayError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn yields_fragments_until_done_sentinel() {
        let first = delta("Hel");
        let second = delta("lo");
        let trailing = delta("ignored");
        let fragments = collect(parse_completion_stream(
            body(&[
                first.as_str(),
                second.as_str(),
                "data: [DONE]\n\n",
                trailing.as_str(),
            ]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(
            fragments,
            vec![Ok("Hel".to_string()), Ok("lo".to_string())]
        );
    }

    #[tokio::test]
    async fn reassembles_chunks_split_mid_event() {
        let event = delta("split");
        let (head, tail) = event.split_at(7);
        let fragments = collect(parse_completion_stream(
            body(&[head, tail, "data: [DONE]\n\n"]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(fragments, vec![Ok("split".to_string())]);
    }

    #[tokio::test]
    async fn skips_role_only_and_empty_deltas() {
        let role_only = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n";
        let empty = delta("");
        let content = delta("text");
        let fragments = collect(parse_completion_stream(
            body(&[role_only, empty.as_str(), content.as_str()]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(fragments, vec![Ok("text".to_string())]);
    }

    #[tokio::test]
    async fn in_band_provider_error_ends_stream_after_prior_fragments() {
        let content = delta("partial");
        let fragments = collect(parse_completion_stream(
            body(&[
                content.as_str(),
                "data: {\"error\":{\"code\":\"overloaded\",\"message\":\"busy\"}}\n\n",
            ]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(
            fragments,
            vec![
                Ok("partial".to_string()),
                Err(LlmGatewayError::ProviderFailure(
                    "stream_error code=overloaded".to_string()
                )),
            ]
        );
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_error_item() {
        let content = delta("a");
        let chunks: Vec<Result<Vec<u8>, LlmGatewayError>> = vec![
            Ok(content.into_bytes()),
            Err(LlmGatewayError::ProviderFailure("request_unavailable".to_string())),
        ];
        let fragments = collect(parse_completion_stream(
            stream::iter(chunks),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(fragments.len(), 2);
        assert!(fragments[1].is_err());
    }

    #[tokio::test]
    async fn stalled_upstream_times_out() {
        let content = delta("a");
        let stalled = body(&[content.as_str()]).chain(stream::pending());
        let fragments = collect(parse_completion_stream(
            stalled,
            Duration::from_millis(20),
        ))
        .await;

        assert_eq!(
            fragments,
            vec![Ok("a".to_string()), Err(LlmGatewayError::Timeout)]
        );
    }

    #[test]
    fn provider_error_code_parsing_handles_shapes() {
        assert_eq!(
            parse_provider_error_code(r#"{"error":{"code":"rate_limit_exceeded"}}"#),
            "rate_limit_exceeded"
        );
        assert_eq!(parse_provider_error_code(r#"{"error":{"code":429}}"#), "429");
        assert_eq!(parse_provider_error_code("not json"), "unknown");
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = ChatCompletionsConfig::new("http://localhost", "secret-key", "model");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
