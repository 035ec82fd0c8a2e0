//! Proxy module - protocol-translation gateway core.
//!
//! OpenAI, Claude and Gemini requests all converge on one upstream protocol;
//! this module owns both directions of that translation plus the credential
//! pool that authenticates the upstream calls.

pub mod caches;
pub mod common;
pub mod handlers;
pub mod mappers;
pub mod params;
pub mod streaming;
pub mod token_manager;
pub mod upstream;

pub use caches::CacheRegistry;
pub use streaming::{StreamEvent, StreamParser};
pub use token_manager::TokenManager;
pub use upstream::UpstreamClient;
