pub mod chat_completions;
pub mod gateway;
pub mod mock;
pub mod observability;

pub use chat_completions::{
    ChatCompletionsConfig, ChatCompletionsGateway, ChatGatewayConfigError,
    parse_completion_stream,
};
pub use gateway::{
    LlmCompletion, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    LlmStreamFuture, LlmTextStream, LlmTokenUsage,
};
pub use mock::{MOCK_MODEL, MockGateway};
pub use observability::{
    GenerationOutcome, HealthTransition, LlmExecutionSource, LlmTelemetryEvent,
    complete_with_telemetry, log_llm_telemetry, stream_telemetry,
};
