use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Router, middleware};
use relay_shared::attachments::DocumentTextExtractor;
use relay_shared::conversation::ConversationStore;
use relay_shared::llm::LlmGateway;
use tower_http::cors::CorsLayer;

mod analyze;
mod conversations;
mod errors;
mod generate;
mod health;
mod observability;
mod rate_limit;
mod stream;

pub use rate_limit::{RateLimitPolicy, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<dyn ConversationStore>,
    pub llm_gateway: Arc<dyn LlmGateway>,
    pub document_extractor: Arc<dyn DocumentTextExtractor>,
    pub rate_limiter: RateLimiter,
    pub trusted_proxy_ips: HashSet<IpAddr>,
    pub max_request_body_bytes: usize,
}

pub fn build_router(app_state: AppState) -> Router {
    let rate_limit_state = app_state.clone();

    let generate_routes = Router::new()
        .route("/generate", post(generate::generate))
        .route("/generate/stream", post(stream::generate_stream))
        .route("/analyze", post(analyze::analyze))
        .layer(DefaultBodyLimit::max(app_state.max_request_body_bytes))
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            rate_limit::generate_rate_limit_middleware,
        ))
        .with_state(app_state.clone());

    let public_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route(
            "/conversation/{conversation_id}",
            get(conversations::get_conversation).delete(conversations::delete_conversation),
        )
        .with_state(app_state);

    public_routes
        .merge(generate_routes)
        .layer(middleware::from_fn(
            observability::request_observability_middleware,
        ))
        .layer(CorsLayer::permissive())
}
