//! Gemini generateContent API types.
//!
//! Gemini is a pass-through protocol: the caller already speaks the upstream
//! contents shape, so requests deserialize straight into the unified model and
//! only need repair (missing function-call ids, malformed thought/signature
//! pairings) rather than translation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::unified::UnifiedContent;

/// Gemini generateContent / streamGenerateContent request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct GeminiRequest {
    #[serde(default)]
    pub contents: Vec<UnifiedContent>,
    #[serde(rename = "systemInstruction", default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Value>,
    #[serde(rename = "generationConfig", default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(rename = "safetySettings", default, skip_serializing_if = "Option::is_none")]
    pub safety_settings: Option<Value>,
}
