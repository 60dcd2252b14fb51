#![allow(dead_code)]

pub mod scripted;

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use relay_api::http::{AppState, RateLimitPolicy, RateLimiter, build_router};
use relay_shared::attachments::{DocumentTextExtractor, ExtractionError};
use relay_shared::conversation::{ConversationStore, InMemoryConversationStore, StoreFuture};
use relay_shared::models::{StreamEvent, Turn};
use relay_shared::sse::SseEventDecoder;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use scripted::ScriptedGateway;

const TEST_CONVERSATION_TTL: Duration = Duration::from_secs(3600);
const TEST_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
const UNLIMITED_REQUESTS: usize = 10_000;

/// Treats the document bytes as UTF-8 text. Documents starting with `FAIL`
/// are unreadable.
pub struct PlainTextExtractor;

impl DocumentTextExtractor for PlainTextExtractor {
    fn extract_text(&self, document: &[u8]) -> Result<String, ExtractionError> {
        if document.starts_with(b"FAIL") {
            return Err(ExtractionError::Document("broken cross-reference table".to_string()));
        }
        String::from_utf8(document.to_vec())
            .map_err(|err| ExtractionError::Document(err.to_string()))
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub store: InMemoryConversationStore,
    pub gateway: Arc<ScriptedGateway>,
}

pub fn test_app() -> TestApp {
    test_app_with_rate_limit(UNLIMITED_REQUESTS)
}

pub fn test_app_with_rate_limit(max_requests: usize) -> TestApp {
    let store = InMemoryConversationStore::new(TEST_CONVERSATION_TTL);
    build_test_app(max_requests, Arc::new(store.clone()), store)
}

/// Commits land in `store` only after `commit_delay`.
pub fn test_app_with_slow_commits(commit_delay: Duration) -> TestApp {
    let store = InMemoryConversationStore::new(TEST_CONVERSATION_TTL);
    let slow = SlowCommitStore {
        inner: store.clone(),
        commit_delay,
    };
    build_test_app(UNLIMITED_REQUESTS, Arc::new(slow), store)
}

fn build_test_app(
    max_requests: usize,
    conversations: Arc<dyn ConversationStore>,
    store: InMemoryConversationStore,
) -> TestApp {
    let gateway = Arc::new(ScriptedGateway::default());

    let router = build_router(AppState {
        conversations,
        llm_gateway: gateway.clone(),
        document_extractor: Arc::new(PlainTextExtractor),
        rate_limiter: RateLimiter::new(RateLimitPolicy {
            max_requests,
            window: Duration::from_secs(60),
        }),
        trusted_proxy_ips: HashSet::<IpAddr>::new(),
        max_request_body_bytes: TEST_MAX_BODY_BYTES,
    });

    TestApp {
        router,
        store,
        gateway,
    }
}

struct SlowCommitStore {
    inner: InMemoryConversationStore,
    commit_delay: Duration,
}

impl ConversationStore for SlowCommitStore {
    fn load<'a>(&'a self, conversation_id: &'a str) -> StoreFuture<'a, Option<Vec<Turn>>> {
        self.inner.load(conversation_id)
    }

    fn replace<'a>(&'a self, conversation_id: &'a str, turns: Vec<Turn>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            tokio::time::sleep(self.commit_delay).await;
            self.inner.replace(conversation_id, turns).await
        })
    }

    fn delete<'a>(&'a self, conversation_id: &'a str) -> StoreFuture<'a, bool> {
        self.inner.delete(conversation_id)
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        self.inner.ping()
    }
}

pub struct JsonResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub struct RawResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub retry_after: Option<String>,
    pub request_id: Option<String>,
    pub body: Vec<u8>,
}

pub async fn send_json(app: &axum::Router, request: Request<Body>) -> JsonResponse {
    let response = send_raw(app, request).await;
    let body = serde_json::from_slice::<Value>(&response.body).unwrap_or_else(|_| json!({}));

    JsonResponse {
        status: response.status,
        body,
    }
}

pub async fn send_raw(app: &axum::Router, request: Request<Body>) -> RawResponse {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should succeed");
    let header_value = |name: header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    };

    let status = response.status();
    let content_type = header_value(header::CONTENT_TYPE);
    let retry_after = header_value(header::RETRY_AFTER);
    let request_id = header_value(header::HeaderName::from_static("x-request-id"));
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should read")
        .to_vec();

    RawResponse {
        status,
        content_type,
        retry_after,
        request_id,
        body,
    }
}

pub fn request(method: Method, uri: &str, json_body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    match json_body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build"),
        None => builder.body(Body::empty()).expect("request should build"),
    }
}

pub fn stream_events(body: &[u8]) -> Vec<StreamEvent> {
    let mut decoder = SseEventDecoder::new();
    let mut payloads = decoder.push(body).expect("event stream should decode");
    payloads.extend(decoder.finish().expect("event stream should flush"));

    payloads
        .iter()
        .map(|payload| serde_json::from_str(payload).expect("event payload should parse"))
        .collect()
}

pub fn data_uri(media_type: &str, contents: &[u8]) -> String {
    format!("data:{media_type};base64,{}", STANDARD.encode(contents))
}

pub fn error_message(body: &Value) -> Option<&str> {
    body.get("error").and_then(Value::as_str)
}

pub struct TestServer {
    pub base_url: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.expect("test server task should join");
    }
}

pub async fn spawn_test_server(router: axum::Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("test listener should bind");
    let addr = listener
        .local_addr()
        .expect("test listener should have addr");
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await
        .expect("test server should run");
    });

    TestServer {
        base_url: format!("http://{addr}"),
        shutdown,
        handle,
    }
}
