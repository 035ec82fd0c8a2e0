//! Thin per-protocol HTTP handlers.
//!
//! Parsing/rendering glue only: every handler follows the same shape —
//! parse → acquire credential → build upstream body → call upstream → render
//! (SSE with heartbeat, or one aggregate JSON).

pub mod claude;
pub mod error_envelope;
pub mod gemini;
pub mod openai;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use prism_types::credential::Credential;

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::caches::CacheRegistry;
use crate::proxy::token_manager::TokenManager;
use crate::proxy::upstream::{self, UpstreamClient};

/// Models exposed through the listing endpoints. The generation path itself
/// forwards whatever model the client names.
pub(crate) const SUPPORTED_MODELS: &[&str] = &[
    "gemini-3-pro",
    "gemini-3-flash",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-thinking",
    "claude-opus-4-5",
    "claude-opus-4-5-thinking",
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-thinking",
];

#[derive(Clone)]
pub struct AppState {
    pub token_manager: Arc<TokenManager>,
    pub caches: Arc<CacheRegistry>,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub fn from_config() -> Self {
        Self {
            token_manager: Arc::new(TokenManager::from_config()),
            caches: Arc::new(CacheRegistry::new()),
            upstream: Arc::new(UpstreamClient::new()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/models", get(openai::list_models))
        .route("/v1/messages", post(claude::messages))
        .route("/v1beta/models", get(gemini::list_models))
        .route("/v1beta/models/:model_action", post(gemini::generate))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `Ok(None)` from the pool is a client-visible auth failure.
pub(crate) async fn acquire_token(state: &AppState) -> ProxyResult<Credential> {
    match state.token_manager.get_token().await? {
        Some(credential) => Ok(credential),
        None => Err(ProxyError::NoTokenAvailable),
    }
}

/// Call upstream and apply the credential-health policy: a non-context-length
/// 403 disables the credential that made the call (the current request still
/// fails; the next one benefits), a quota-flavored 429 marks it exhausted.
pub(crate) async fn call_upstream(
    state: &AppState,
    body: &serde_json::Value,
    credential: &Credential,
    stream: bool,
) -> ProxyResult<reqwest::Response> {
    match state.upstream.generate(body, &credential.access_token, stream).await {
        Ok(response) => Ok(response),
        Err(e) => {
            if let ProxyError::UpstreamApi { status, body, .. } = &e {
                match status {
                    403 if !upstream::is_context_length_error(body) => {
                        tracing::warn!(
                            "[Handlers] Upstream 403 for …{}, disabling credential",
                            credential.token_suffix()
                        );
                        state.token_manager.disable_token(&credential.refresh_token).await;
                    },
                    429 if body.to_lowercase().contains("quota") => {
                        state
                            .token_manager
                            .mark_quota_exhausted(&credential.refresh_token)
                            .await;
                    },
                    _ => {},
                }
            }
            Err(e)
        },
    }
}

/// Standard SSE response headers.
pub(crate) fn sse_headers() -> [(&'static str, &'static str); 3] {
    [
        ("content-type", "text/event-stream"),
        ("cache-control", "no-cache"),
        ("connection", "keep-alive"),
    ]
}
