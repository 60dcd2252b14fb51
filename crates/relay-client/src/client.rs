use std::time::Duration;

use futures::StreamExt;
use relay_shared::code_review::CodeReview;
use relay_shared::models::{
    AnalyzeRequest, ConversationHistoryResponse, ErrorResponse, GenerateRequest,
    GenerateResponse, StreamGenerateRequest, Turn,
};
use relay_shared::sse::SseDecodeError;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::events::{EventStream, decode_event_stream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid relay url: {0}")]
    InvalidServerUrl(String),
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error(transparent)]
    Decode(#[from] SseDecodeError),
    #[error("invalid stream event: {0}")]
    InvalidEvent(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base_url =
            Url::parse(base_url).map_err(|err| ClientError::InvalidServerUrl(err.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidServerUrl(format!(
                "unsupported scheme '{}'",
                base_url.scheme()
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["generate"])?)
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<CodeReview, ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["analyze"])?)
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Opens `/generate/stream`. Errors raised before the stream opened
    /// (validation, upstream unavailable) come back as `ClientError::Status`.
    pub async fn stream_generate(
        &self,
        request: &StreamGenerateRequest,
    ) -> Result<EventStream, ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["generate", "stream"])?)
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::Http));
        Ok(decode_event_stream(Box::pin(body)))
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Option<Vec<Turn>>, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&["conversation", conversation_id])?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        let body: ConversationHistoryResponse = response.json().await?;
        Ok(Some(body.history))
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.endpoint(&["conversation", conversation_id])?)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidServerUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|error| error.error)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        });

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_joined_under_the_base_path() {
        let client = RelayClient::new("http://127.0.0.1:5000").expect("client should build");
        assert_eq!(
            client
                .endpoint(&["generate", "stream"])
                .expect("endpoint")
                .as_str(),
            "http://127.0.0.1:5000/generate/stream"
        );

        let prefixed = RelayClient::new("https://relay.example/api").expect("client should build");
        assert_eq!(
            prefixed
                .endpoint(&["conversation", "abc"])
                .expect("endpoint")
                .as_str(),
            "https://relay.example/api/conversation/abc"
        );
    }

    #[test]
    fn conversation_ids_are_escaped_as_one_segment() {
        let client = RelayClient::new("http://localhost:5000/").expect("client should build");
        assert_eq!(
            client
                .endpoint(&["conversation", "a/b c"])
                .expect("endpoint")
                .as_str(),
            "http://localhost:5000/conversation/a%2Fb%20c"
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            RelayClient::new("ftp://relay.example"),
            Err(ClientError::InvalidServerUrl(_))
        ));
        assert!(matches!(
            RelayClient::new("not a url"),
            Err(ClientError::InvalidServerUrl(_))
        ));
    }
}
