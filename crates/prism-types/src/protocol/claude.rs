//! Anthropic Claude Messages API types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Claude create-message request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ClaudeRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ClaudeMessage>,
    /// System prompt: plain string or array of text blocks.
    #[serde(default)]
    pub system: Option<ClaudeSystem>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// Extended-thinking control.
    #[serde(default)]
    pub thinking: Option<ClaudeThinking>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
}

/// `thinking: {type: "enabled"|"disabled", budget_tokens}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaudeThinking {
    #[serde(rename = "type")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<i64>,
}

impl ClaudeThinking {
    pub fn is_enabled(&self) -> bool {
        self.mode == "enabled"
    }
}

/// System prompt: string or `[{type:"text", text}]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum ClaudeSystem {
    String(String),
    Blocks(Vec<ClaudeSystemBlock>),
}

impl ClaudeSystem {
    pub fn as_text(&self) -> String {
        match self {
            ClaudeSystem::String(s) => s.clone(),
            ClaudeSystem::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSystemBlock {
    #[serde(rename = "type", default)]
    pub block_type: String,
    #[serde(default)]
    pub text: String,
}

/// One message in a Claude conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessage {
    /// "user" | "assistant".
    pub role: String,
    pub content: ClaudeContent,
}

/// Message content: string or array of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaudeContent {
    String(String),
    Array(Vec<ClaudeContentBlock>),
}

/// Claude message content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum ClaudeContentBlock {
    /// Plain text content.
    #[serde(rename = "text")]
    Text { text: String },
    /// Image content with base64 or URL source.
    #[serde(rename = "image")]
    Image { source: ClaudeSource },
    /// Document (PDF etc.) content, same source shapes as images.
    #[serde(rename = "document")]
    Document { source: ClaudeSource },
    /// Extended-thinking block with continuation signature.
    #[serde(rename = "thinking")]
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    /// Opaque redacted thinking payload.
    #[serde(rename = "redacted_thinking")]
    RedactedThinking {
        #[serde(default)]
        data: String,
    },
    /// Tool use request from the model.
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Tool execution result.
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: Option<bool>,
    },
}

/// Image/document source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSource {
    /// "base64" | "url".
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}
