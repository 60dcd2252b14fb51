use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_api::http::{self, RateLimitPolicy, RateLimiter};
use relay_shared::attachments::{DocumentTextExtractor, PdfiumTextExtractor};
use relay_shared::config::{RelayConfig, StoreBackend, load_dotenv};
use relay_shared::conversation::{
    ConversationStore, InMemoryConversationStore, RedisConversationStore,
};
use relay_shared::llm::{ChatCompletionsGateway, LlmGateway, MockGateway};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "relay_api=debug,relay_shared=info,tower_http=info";
const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    let dotenv_result = load_dotenv();
    init_tracing();
    if let Err(err) = dotenv_result {
        error!("{err}");
        std::process::exit(1);
    }

    let config = match RelayConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read config: {err}");
            std::process::exit(1);
        }
    };

    let conversation_ttl = Duration::from_secs(config.conversation_ttl_seconds);
    let conversations: Arc<dyn ConversationStore> = match &config.store_backend {
        StoreBackend::Memory => {
            let store = InMemoryConversationStore::new(conversation_ttl);
            store.spawn_sweeper(Duration::from_secs(config.sweep_interval_seconds));
            Arc::new(store)
        }
        StoreBackend::Redis { redis_url } => {
            match RedisConversationStore::connect(redis_url, conversation_ttl).await {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    error!("failed to connect to redis: {err}");
                    std::process::exit(1);
                }
            }
        }
    };

    let llm_gateway: Arc<dyn LlmGateway> = match config.llm.clone() {
        Some(llm_config) => match ChatCompletionsGateway::new(llm_config) {
            Ok(gateway) => {
                info!(model = gateway.model(), "using chat completions provider");
                Arc::new(gateway)
            }
            Err(err) => {
                error!("failed to build llm gateway: {err}");
                std::process::exit(1);
            }
        },
        None => {
            warn!("LLM_API_KEY not set; serving canned responses from the mock gateway");
            Arc::new(MockGateway::new())
        }
    };

    let document_extractor: Arc<dyn DocumentTextExtractor> = match &config.pdfium_library_dir {
        Some(dir) => Arc::new(PdfiumTextExtractor::with_library_dir(dir)),
        None => Arc::new(PdfiumTextExtractor::new()),
    };

    let rate_limiter = RateLimiter::new(RateLimitPolicy {
        max_requests: config.rate_limit_max_requests as usize,
        window: Duration::from_secs(config.rate_limit_window_seconds),
    });
    rate_limiter.spawn_pruner(RATE_LIMIT_PRUNE_INTERVAL);

    let app = http::build_router(http::AppState {
        conversations,
        llm_gateway,
        document_extractor,
        rate_limiter,
        trusted_proxy_ips: config.trusted_proxy_ips.iter().copied().collect::<HashSet<_>>(),
        max_request_body_bytes: config.max_request_body_bytes,
    });

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid RELAY_BIND_ADDR '{}': {err}", config.bind_addr);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "relay api listening on {}",
        listener.local_addr().unwrap_or(addr)
    );
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("relay api server failed: {err}");
        std::process::exit(1);
    }
    info!("relay api stopped");
}

fn init_tracing() {
    let filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
    );
    let json = std::env::var("LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
