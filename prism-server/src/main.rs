//! Prism Server - Headless Gateway Daemon
//!
//! Exposes OpenAI Chat Completions, Anthropic Messages and Gemini
//! generateContent endpoints, all translated onto one upstream provider with
//! a rotating credential pool.
//!
//! Access via: http://localhost:8317

use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prism_core::config::{self, GatewayConfig};
use prism_core::proxy::handlers::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("PRISM_CONFIG").unwrap_or_else(|_| "prism.json".to_string());
    let gateway_config = GatewayConfig::load(std::path::Path::new(&config_path));
    config::update_config(gateway_config.clone());

    info!(
        "🚀 Prism starting on {}:{} (strategy: {:?}, tokens: {})",
        gateway_config.host,
        gateway_config.port,
        gateway_config.rotation.strategy,
        gateway_config.token_file.display()
    );

    let state = AppState::from_config();

    // Warm the pool up front so the first request doesn't pay for it; the
    // pool also initializes lazily if this fails.
    match state.token_manager.reload().await {
        Ok(count) => info!("📊 Loaded {} credential(s) into token manager", count),
        Err(e) => tracing::warn!("⚠️ Could not preload credentials: {}", e),
    }

    let addr: SocketAddr = format!("{}:{}", gateway_config.host, gateway_config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("✅ Listening on http://{}", addr);

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
