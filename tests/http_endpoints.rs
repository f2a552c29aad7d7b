//! Integration tests for the HTTP surface
//!
//! The router is the real one from `handlers::app`; only the providers and
//! classifier behind the coordinator are scripted, so no request leaves the
//! process.

mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use std::str::FromStr;
use std::sync::Arc;
use switchboard::config::Config;
use switchboard::coordinator::Coordinator;
use switchboard::handlers::{self, AppState};
use switchboard::metrics::Metrics;
use switchboard::providers::{CircuitBreaker, ProviderId};
use switchboard::router::Category;
use switchboard::specialists::SpecialistResolver;
use tower::ServiceExt;

const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[chat]
max_message_chars = 100

[providers.primary]
name = "gpt-4o-mini"
base_url = "http://127.0.0.1:9/v1"

[providers.secondary]
name = "llama-3.3-70b"
base_url = "http://127.0.0.1:9/v1"
"#;

struct TestApp {
    router: Router,
    primary: Arc<ScriptedProvider>,
    primary_breaker: Arc<CircuitBreaker>,
    metrics: Arc<Metrics>,
}

fn test_app(category: Category, answer: &str) -> TestApp {
    let config = Arc::new(Config::from_str(CONFIG).expect("test config should parse"));
    let metrics = metrics();
    let primary = ScriptedProvider::answering(ProviderId::Primary, answer).arc();
    let primary_breaker = breaker_with_threshold(ProviderId::Primary, 1);
    let resolver = SpecialistResolver::builder(metrics.clone())
        .primary(primary.clone(), primary_breaker.clone(), CALL_TIMEOUT)
        .secondary(
            ScriptedProvider::failing(ProviderId::Secondary, transport(ProviderId::Secondary))
                .arc(),
            breaker_with_threshold(ProviderId::Secondary, 1),
            CALL_TIMEOUT,
        )
        .build();
    let coordinator = Coordinator::new(
        FixedClassifier::category(category),
        Arc::new(resolver),
        metrics.clone(),
    );

    TestApp {
        router: handlers::app(AppState::new(config, Arc::new(coordinator), metrics.clone())),
        primary,
        primary_breaker,
        metrics,
    }
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

#[tokio::test]
async fn test_chat_returns_answer_and_routing_metadata() {
    let app = test_app(Category::CodeGeneration, "fn main() {}");

    let response = app
        .router
        .oneshot(post_json(
            "/chat",
            r#"{"message": "write a hello world", "user_id": "u-42"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let json = body_json(response).await;
    assert_eq!(json["text"], "fn main() {}");
    assert_eq!(json["provider"], "primary");
    assert_eq!(json["category"], "code_generation");
    assert_eq!(json["fellback"], false);
    assert_eq!(app.primary.calls(), 1);
}

#[tokio::test]
async fn test_chat_rejects_blank_message() {
    let app = test_app(Category::GeneralChat, "hi");

    let response = app
        .router
        .oneshot(post_json("/chat", r#"{"message": "   "}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("empty"));
    assert_eq!(app.primary.calls(), 0);
}

#[tokio::test]
async fn test_chat_rejects_oversized_message_and_bad_timeout() {
    let long = "x".repeat(101);
    for body in [
        format!(r#"{{"message": "{}"}}"#, long),
        r#"{"message": "hi", "timeout_seconds": 0}"#.to_string(),
        r#"{"message": "hi", "timeout_seconds": 301}"#.to_string(),
    ] {
        let app = test_app(Category::GeneralChat, "hi");
        let response = app.router.oneshot(post_json("/chat", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
    }
}

#[tokio::test]
async fn test_chat_reuses_client_request_id() {
    let app = test_app(Category::GeneralChat, "hi");
    let id = "6f1c1c2e-3b55-4f0e-9d8a-2c8e7a1b9f00";

    let mut request = post_json("/chat", r#"{"message": "hello"}"#);
    request
        .headers_mut()
        .insert("x-request-id", id.parse().unwrap());
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], id);
}

#[tokio::test]
async fn test_chat_stream_is_server_sent_events() {
    let app = test_app(Category::GeneralChat, "hello there");

    let response = app
        .router
        .oneshot(post_json("/chat/stream", r#"{"message": "hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let routing = text.find("event: routing").expect("routing event");
    let content = text.find("event: content").expect("content event");
    let done = text.find("event: done").expect("done event");
    assert!(routing < content && content < done, "{}", text);
    assert!(text.contains(r#""provider":"primary""#), "{}", text);
}

#[tokio::test]
async fn test_chat_stream_validates_before_streaming() {
    let app = test_app(Category::GeneralChat, "hi");

    let response = app
        .router
        .oneshot(post_json("/chat/stream", r#"{"message": ""}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_breaker_states() {
    let app = test_app(Category::GeneralChat, "hi");
    trip(&app.primary_breaker).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "OK", "secondary is still closed");
    assert_eq!(json["local_configured"], false);
    assert_eq!(json["providers"][0]["provider"], "primary");
    assert_eq!(json["providers"][0]["state"], "open");
    assert!(json["providers"][0]["reopens_in_seconds"].as_u64().is_some());
    assert_eq!(json["providers"][1]["state"], "closed");
}

#[tokio::test]
async fn test_admin_reset_closes_breaker() {
    let app = test_app(Category::GeneralChat, "hi");
    trip(&app.primary_breaker).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json("/admin/breakers/primary/reset", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["state"], "closed");
    assert_eq!(
        app.primary_breaker.state().await,
        switchboard::providers::CircuitState::Closed
    );

    let unknown = app
        .router
        .clone()
        .oneshot(post_json("/admin/breakers/tertiary/reset", ""))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let local = app
        .router
        .oneshot(post_json("/admin/breakers/local/reset", ""))
        .await
        .unwrap();
    assert_eq!(local.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_dispatch_counters() {
    let app = test_app(Category::GeneralChat, "hi");

    let chat = app
        .router
        .clone()
        .oneshot(post_json("/chat", r#"{"message": "hello"}"#))
        .await
        .unwrap();
    assert_eq!(chat.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("switchboard_"), "{}", text);
    assert_eq!(
        app.metrics
            .dispatch_count(ProviderId::Primary, switchboard::metrics::DispatchOutcome::Success),
        1
    );
}
