pub mod attachments;
pub mod code_review;
pub mod config;
mod config_env;
pub mod conversation;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod relay;
pub mod sse;
