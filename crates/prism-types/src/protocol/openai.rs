//! OpenAI Chat Completions API types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenAI chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct OpenAiRequest {
    /// Model identifier (e.g., "gemini-3-pro", "claude-sonnet-4-5-thinking").
    pub model: String,
    /// Conversation messages.
    #[serde(default)]
    pub messages: Vec<OpenAiMessage>,
    /// Enable streaming response.
    #[serde(default)]
    pub stream: bool,
    /// Maximum tokens in response.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Newer alias for `max_tokens`; takes precedence when both are present.
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,
    /// Top-k sampling parameter (non-standard, accepted for compatibility).
    pub top_k: Option<u32>,
    /// Reasoning effort: "low" | "medium" | "high".
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Tool definitions for function calling.
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    /// Tool choice strategy.
    #[serde(default)]
    pub tool_choice: Option<Value>,
}

/// One message in an OpenAI conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct OpenAiMessage {
    /// "system" | "developer" | "user" | "assistant" | "tool" | "function".
    pub role: String,
    #[serde(default)]
    pub content: Option<OpenAiContent>,
    /// Chain-of-thought text echoed back by reasoning-aware clients.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    /// Set on tool-role messages: the call this result answers.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Tool name on tool-role messages.
    #[serde(default)]
    pub name: Option<String>,
}

/// Content in an OpenAI message (string or array of blocks).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OpenAiContent {
    /// Plain text content.
    String(String),
    /// Array of content blocks (text, images, audio).
    Array(Vec<OpenAiContentBlock>),
}

/// Content block types in OpenAI messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum OpenAiContentBlock {
    /// Text content block.
    #[serde(rename = "text")]
    Text { text: String },
    /// Image URL content block (data URL or remote URL).
    #[serde(rename = "image_url")]
    ImageUrl { image_url: OpenAiImageUrl },
    /// Audio input content block.
    #[serde(rename = "input_audio")]
    InputAudio { input_audio: OpenAiInputAudio },
}

/// Image URL payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAiImageUrl {
    /// `data:<mime>;base64,<payload>` or a plain https URL.
    pub url: String,
}

/// Base64 audio payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAiInputAudio {
    pub data: String,
    /// Audio container format (wav, mp3, ...).
    pub format: String,
}

/// Tool call on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

/// Function name + JSON-encoded arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAiFunctionCall {
    pub name: String,
    /// Raw JSON string, as the OpenAI wire format requires.
    #[serde(default)]
    pub arguments: String,
}
