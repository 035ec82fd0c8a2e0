//! Router-level integration tests: request parsing, error envelopes and the
//! model listings, exercised without an upstream.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use prism_core::proxy::handlers::{build_router, AppState};
use prism_core::proxy::token_manager::{RotationStrategy, TokenManager, TokenStore};
use prism_core::proxy::upstream::UpstreamClient;
use prism_core::CacheRegistry;

fn empty_pool_state(dir: &tempfile::TempDir) -> AppState {
    let store = TokenStore::new(dir.path().join("tokens.json"));
    AppState {
        token_manager: Arc::new(TokenManager::new(store, RotationStrategy::RoundRobin, 1, true)),
        caches: Arc::new(CacheRegistry::new()),
        upstream: Arc::new(UpstreamClient::new()),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn empty_pool_yields_openai_auth_error_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(empty_pool_state(&dir));

    let request = post_json(
        "/v1/chat/completions",
        json!({"model": "gemini-3-pro", "messages": [{"role": "user", "content": "hi"}]}),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], json!("authentication_error"));
    assert!(body["error"]["message"].as_str().unwrap().contains("credential"));
}

#[tokio::test]
async fn claude_surface_uses_claude_error_shape() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(empty_pool_state(&dir));

    let request = post_json(
        "/v1/messages",
        json!({"model": "claude-sonnet-4-5", "messages": [{"role": "user", "content": "hi"}]}),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["type"], json!("error"));
    assert_eq!(body["error"]["type"], json!("authentication_error"));
}

#[tokio::test]
async fn gemini_surface_uses_gemini_error_shape() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(empty_pool_state(&dir));

    let request = post_json(
        "/v1beta/models/gemini-3-pro:generateContent",
        json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]}),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["error"]["status"], json!("UNAUTHENTICATED"));
    assert_eq!(body["error"]["code"], json!(401));
}

#[tokio::test]
async fn unknown_gemini_action_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(empty_pool_state(&dir));

    let request = post_json("/v1beta/models/gemini-3-pro:countTokens", json!({"contents": []}));
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["status"], json!("INVALID_ARGUMENT"));
}

#[tokio::test]
async fn model_listings_render_per_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(empty_pool_state(&dir));

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["object"], json!("list"));
    assert!(body["data"].as_array().unwrap().len() > 3);

    let response = router
        .oneshot(Request::builder().uri("/v1beta/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    let models = body["models"].as_array().unwrap();
    assert!(models.iter().all(|m| m["name"].as_str().unwrap().starts_with("models/")));
}
