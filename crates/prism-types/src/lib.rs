//! # Prism Types
//!
//! Shared type definitions for the prism gateway: client protocol DTOs
//! (OpenAI / Claude / Gemini), the unified upstream contents model, and the
//! credential shape persisted in the token file.

pub mod credential;
pub mod protocol;
pub mod unified;

pub use credential::{Credential, REFRESH_BUFFER_MS};
pub use unified::{
    FileData, FunctionCall, FunctionResponse, InlineData, UnifiedContent, UnifiedPart, UnifiedRole,
};
