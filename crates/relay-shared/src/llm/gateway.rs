use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Turn;
use crate::prompts::FeatureMode;

pub type LlmGatewayFuture<'a> =
    Pin<Box<dyn Future<Output = Result<LlmCompletion, LlmGatewayError>> + Send + 'a>>;

/// Text fragments in provider order. Ends after the final fragment, or with
/// one `Err` if the upstream failed partway.
pub type LlmTextStream = BoxStream<'static, Result<String, LlmGatewayError>>;

pub type LlmStreamFuture<'a> =
    Pin<Box<dyn Future<Output = Result<LlmTextStream, LlmGatewayError>> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct LlmGatewayRequest {
    pub mode: FeatureMode,
    pub messages: Vec<Turn>,
}

impl LlmGatewayRequest {
    pub fn new(mode: FeatureMode, messages: Vec<Turn>) -> Self {
        Self { mode, messages }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmTokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCompletion {
    pub model: String,
    pub provider_request_id: Option<String>,
    pub text: String,
    pub usage: Option<LlmTokenUsage>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmGatewayError {
    #[error("llm provider request timed out")]
    Timeout,
    #[error("llm provider request failed: {0}")]
    ProviderFailure(String),
    #[error("llm provider returned an invalid payload: {0}")]
    InvalidProviderPayload(String),
}

pub trait LlmGateway: Send + Sync {
    fn complete<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a>;

    /// Opens a streamed completion. Errors returned here happen before any
    /// text was produced.
    fn stream<'a>(&'a self, request: LlmGatewayRequest) -> LlmStreamFuture<'a>;
}
