//! # Prism Core
//!
//! Core gateway logic: protocol conversion, upstream streaming, credential
//! rotation and the thin per-protocol HTTP handlers.
//!
//! ```text
//! prism-core/src/proxy/
//! ├── common/           # model families, tool names, schema cleaning
//! ├── mappers/          # per-protocol request conversion to unified contents
//! ├── handlers/         # axum handlers + per-protocol SSE/error rendering
//! ├── token_manager/    # credential pool, rotation strategies, token store
//! ├── caches.rs         # signature / tool-name / model-list caches
//! ├── params.rs         # generation parameter normalization
//! ├── streaming.rs      # upstream SSE state machine
//! └── upstream.rs       # upstream HTTP client, 429/403 policy
//! ```

pub mod config;
pub mod error;
pub mod proxy;

pub use error::{ProxyError, ProxyResult};
pub use proxy::caches::CacheRegistry;
pub use proxy::token_manager::{RotationStrategy, TokenManager};
