//! Unified upstream contents model.
//!
//! Every inbound protocol is converted into this shape before it is sent
//! upstream, and the upstream stream is parsed back out of it. A part is an
//! open struct rather than an enum because upstream freely combines fields on
//! one part (`text` + `thought` + `thoughtSignature`, or a bare
//! `thoughtSignature` with nothing else during malformed pass-through input).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in the unified contents list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnifiedRole {
    User,
    Model,
}

/// Inline binary payload (images, audio, PDFs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

/// Remote file reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileData {
    #[serde(rename = "fileUri")]
    pub file_uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

/// One part of a unified message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnifiedPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(rename = "thoughtSignature", default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    #[serde(rename = "inlineData", default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(rename = "fileData", default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(rename = "functionCall", default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(rename = "functionResponse", default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl UnifiedPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    pub fn thought(text: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            thought: Some(true),
            thought_signature: Some(signature.into()),
            ..Self::default()
        }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            inline_data: Some(InlineData { mime_type: mime_type.into(), data: data.into() }),
            ..Self::default()
        }
    }

    pub fn file_data(file_uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            file_data: Some(FileData {
                file_uri: file_uri.into(),
                mime_type: mime_type.into(),
            }),
            ..Self::default()
        }
    }

    pub fn function_call(id: Option<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            function_call: Some(FunctionCall { id, name: name.into(), args }),
            ..Self::default()
        }
    }

    pub fn function_response(id: Option<String>, name: impl Into<String>, response: Value) -> Self {
        Self {
            function_response: Some(FunctionResponse { id, name: name.into(), response }),
            ..Self::default()
        }
    }

    pub fn is_thought(&self) -> bool {
        self.thought == Some(true)
    }

    /// A signature with nothing attached to it: no thought flag, no text, no
    /// function call. Produced by some pass-through clients and repaired by
    /// the Gemini mapper.
    pub fn is_standalone_signature(&self) -> bool {
        self.thought_signature.is_some()
            && !self.is_thought()
            && self.text.is_none()
            && self.function_call.is_none()
            && self.function_response.is_none()
            && self.inline_data.is_none()
            && self.file_data.is_none()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One message in the unified contents list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedContent {
    pub role: UnifiedRole,
    pub parts: Vec<UnifiedPart>,
}

impl UnifiedContent {
    pub fn user(parts: Vec<UnifiedPart>) -> Self {
        Self { role: UnifiedRole::User, parts }
    }

    pub fn model(parts: Vec<UnifiedPart>) -> Self {
        Self { role: UnifiedRole::Model, parts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn part_serializes_with_upstream_field_names() {
        let part = UnifiedPart::thought("reasoning...", "sig-1");
        let v = serde_json::to_value(&part).unwrap();
        assert_eq!(v, json!({"text": "reasoning...", "thought": true, "thoughtSignature": "sig-1"}));
    }

    #[test]
    fn standalone_signature_detection() {
        let standalone = UnifiedPart {
            thought_signature: Some("sig".into()),
            ..UnifiedPart::default()
        };
        assert!(standalone.is_standalone_signature());

        let on_thought = UnifiedPart::thought(" ", "sig");
        assert!(!on_thought.is_standalone_signature());

        let mut on_call = UnifiedPart::function_call(None, "f", json!({}));
        on_call.thought_signature = Some("sig".into());
        assert!(!on_call.is_standalone_signature());
    }

    #[test]
    fn pass_through_part_round_trips() {
        let raw = json!({
            "functionCall": {"id": "call_1", "name": "get_weather", "args": {"city": "Oslo"}},
            "thoughtSignature": "sig-2"
        });
        let part: UnifiedPart = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(part.function_call.as_ref().unwrap().name, "get_weather");
        assert_eq!(serde_json::to_value(&part).unwrap(), raw);
    }
}
