// HTTP API tests
// Router exercised in-process with tower::ServiceExt::oneshot

use std::sync::Arc;
use std::time::Duration;

use agrosense_bridge::{build_router, AppState};
use agrosense_core::gateway::{
    ConversationMemory, DeferredQueue, GatewayConfig, GatewayParts, RateLimitConfig, RateLimiter,
};
use agrosense_core::llm::TaskKind;
use agrosense_core::providers::RegionalDataProvider;
use agrosense_core::session::InMemorySessionStore;
use agrosense_core::{
    AgroError, ContextBus, ConversationGateway, GenerationRequest, Result, SessionManager,
    TextGenerator,
};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Conversation replies only; every other task fails
struct EchoGenerator;

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        match request.task {
            TaskKind::Conversation => Ok("Which crop are you growing?".to_string()),
            other => Err(AgroError::Generation(format!("unscripted {}", other.as_str()))),
        }
    }

    fn model_name(&self) -> String {
        "echo".to_string()
    }
}

fn app(requests: u32) -> Router {
    let bus = Arc::new(ContextBus::new());
    let sessions = Arc::new(SessionManager::new(
        Arc::new(InMemorySessionStore::new()),
        Duration::from_secs(60),
    ));
    let gateway = ConversationGateway::new(
        GatewayParts {
            sessions,
            memory: Arc::new(ConversationMemory::new(10)),
            generator: Arc::new(EchoGenerator),
            queue: Arc::new(DeferredQueue::new()),
            bus: bus.clone(),
            regional: Arc::new(RegionalDataProvider::new(bus, None, Duration::from_secs(1))),
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig {
                requests,
                window_secs: 60,
            })),
        },
        GatewayConfig {
            max_session_messages: 100,
            memory_exchanges: 10,
            session_ttl_secs: 60,
            generation_timeout_ms: 5000,
        },
    );
    build_router(AppState::new(Arc::new(gateway)), &[])
}

fn chat(body: Value, client: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_chat_round_trip() {
    let app = app(30);
    let resp = app
        .clone()
        .oneshot(chat(json!({"message": "Hello"}), "203.0.113.1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["message"], "Which crop are you growing?");
    assert_eq!(body["requires_action"], false);
    let sid = body["session_id"].as_str().unwrap().to_string();

    let resp = app
        .oneshot(get(&format!("/api/v1/status/{sid}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "chatting");
}

#[tokio::test]
async fn test_unknown_status_is_404() {
    let resp = app(30)
        .oneshot(get("/api/v1/status/does-not-exist"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body = json_body(resp).await;
    assert_eq!(body["status"], "unknown");
    assert_eq!(body["message"], "Session not found or expired");
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let app = app(2);
    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(chat(json!({"message": "hi"}), "198.51.100.20"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .clone()
        .oneshot(chat(json!({"message": "hi"}), "198.51.100.20"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(resp).await;
    assert_eq!(body["type"], "rate_limited");
    assert_eq!(body["detail"], "Rate limit exceeded. Maximum 2 requests per minute.");
    assert_eq!(body["limit"], 2);
    assert_eq!(body["window_secs"], 60);

    // Different forwarded client has its own budget
    let resp = app
        .oneshot(chat(json!({"message": "hi"}), "198.51.100.21"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_validation_errors_are_422() {
    let app = app(30);

    let resp = app
        .clone()
        .oneshot(chat(json!({"message": "   "}), "192.0.2.1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(resp).await["type"], "validation_error");

    let resp = app
        .clone()
        .oneshot(chat(json!({"text": "wrong field"}), "192.0.2.1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let resp = app.oneshot(get("/api/v1/weather")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_end_session_is_idempotent() {
    let app = app(30);
    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/api/v1/session/abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ended");
    }
}

#[tokio::test]
async fn test_health_and_weather() {
    let app = app(30);

    let resp = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["session_store"], "memory");
    assert_eq!(body["components"]["model"], "echo");
    assert_eq!(body["components"]["context_records"], 0);

    let resp = app
        .clone()
        .oneshot(get("/api/v1/weather?region=Nairobi"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["region"], "Nairobi");
    assert_eq!(body["temperature"], 22.0);

    let resp = app.oneshot(get("/")).await.unwrap();
    assert_eq!(json_body(resp).await["service"], "AgroSense");
}
