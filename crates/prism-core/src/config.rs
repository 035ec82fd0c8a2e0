//! Process-wide gateway configuration.
//!
//! Loaded once by the server binary (JSON file + env overrides) and exposed
//! through a `OnceLock` accessor so mappers and the token manager can read
//! defaults without threading the config through every call.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{OnceLock, RwLock};

use crate::proxy::token_manager::RotationStrategy;

static GLOBAL_CONFIG: OnceLock<RwLock<GatewayConfig>> = OnceLock::new();

/// Generation parameter defaults applied when a client omits a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationDefaults {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    /// Default thinking budget when a thinking-capable model is requested
    /// without an explicit budget.
    pub thinking_budget: i64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 65535,
            temperature: 1.0,
            top_p: 0.95,
            top_k: 64,
            thinking_budget: 1024,
        }
    }
}

/// Credential rotation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RotationConfig {
    pub strategy: RotationStrategy,
    /// Requests served per credential before rotating (request_count strategy).
    pub request_count_limit: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { strategy: RotationStrategy::RoundRobin, request_count_limit: 10 }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// JSON-array credential file, whole-file rewritten on every persist.
    pub token_file: PathBuf,
    pub rotation: RotationConfig,
    pub defaults: GenerationDefaults,
    /// Base system instruction prepended upstream.
    pub system_instruction: Option<String>,
    /// When true, the caller's system prompt is appended to the base
    /// instruction (double-newline separated) instead of replacing it.
    pub append_system_instruction: bool,
    /// Skip the loadCodeAssist project lookup and assign a synthetic id.
    pub skip_project_verification: bool,
    /// Bounded retry count for upstream HTTP 429.
    pub retry_429_max: u32,
    /// Cap on a single retry-after sleep, milliseconds.
    pub retry_max_wait_ms: u64,
    /// Keep-alive frame interval for streamed responses, seconds.
    pub heartbeat_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8317,
            token_file: PathBuf::from("tokens.json"),
            rotation: RotationConfig::default(),
            defaults: GenerationDefaults::default(),
            system_instruction: None,
            append_system_instruction: true,
            skip_project_verification: false,
            retry_429_max: 3,
            retry_max_wait_ms: 10_000,
            heartbeat_interval_secs: 15,
        }
    }
}

impl GatewayConfig {
    /// Load from a JSON file, then apply env overrides. A missing file yields
    /// defaults so the gateway can boot from env alone.
    pub fn load(path: &std::path::Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<GatewayConfig>(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!("[Config] Failed to parse {}: {}, using defaults", path.display(), e);
                    GatewayConfig::default()
                },
            },
            Err(_) => GatewayConfig::default(),
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PRISM_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("PRISM_PORT") {
            match port.parse() {
                Ok(p) => self.port = p,
                Err(_) => tracing::warn!("[Config] Ignoring non-numeric PRISM_PORT: {}", port),
            }
        }
        if let Ok(file) = std::env::var("PRISM_TOKEN_FILE") {
            self.token_file = PathBuf::from(file);
        }
    }
}

/// Get the current gateway configuration (defaults if not yet initialized).
pub fn get_config() -> GatewayConfig {
    GLOBAL_CONFIG
        .get()
        .map(|lock| match lock.read() {
            Ok(cfg) => cfg.clone(),
            Err(poisoned) => {
                tracing::error!("gateway config RwLock poisoned, recovering value");
                poisoned.into_inner().clone()
            },
        })
        .unwrap_or_default()
}

/// Update the global configuration. Called during startup and hot-reload.
pub fn update_config(config: GatewayConfig) {
    let lock = GLOBAL_CONFIG.get_or_init(|| RwLock::new(GatewayConfig::default()));
    match lock.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => {
            tracing::error!("gateway config RwLock poisoned during update, recovering");
            *poisoned.into_inner() = config;
        },
    }
}

/// Mutex for serializing tests that mutate the global config.
#[cfg(test)]
pub static CONFIG_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let _guard = CONFIG_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.defaults.thinking_budget, 1024);
        assert_eq!(cfg.rotation.strategy, RotationStrategy::RoundRobin);
        assert_eq!(cfg.heartbeat_interval_secs, 15);
    }

    #[test]
    fn update_and_get_round_trip() {
        let _guard = CONFIG_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut cfg = GatewayConfig::default();
        cfg.port = 9000;
        cfg.rotation.strategy = RotationStrategy::QuotaExhausted;
        update_config(cfg.clone());
        let got = get_config();
        assert_eq!(got.port, 9000);
        assert_eq!(got.rotation.strategy, RotationStrategy::QuotaExhausted);
        // Restore defaults for other tests reading the global.
        update_config(GatewayConfig::default());
    }
}
