//! Anthropic Messages conversation → unified contents.

use serde_json::{json, Value};

use prism_types::protocol::claude::{ClaudeContent, ClaudeContentBlock, ClaudeMessage, ClaudeSource};
use prism_types::unified::{UnifiedContent, UnifiedPart};

use super::{ensure_thought_part, merge_consecutive_roles, resolve_call_name, SignatureResolver};
use crate::proxy::caches::CacheRegistry;
use crate::proxy::common::tool_names::register_tool_name;

pub fn convert_claude_messages(
    messages: &[ClaudeMessage],
    enable_thinking: bool,
    model: &str,
    session_id: &str,
    caches: &CacheRegistry,
) -> Vec<UnifiedContent> {
    let resolver = SignatureResolver::new(caches, session_id, model);
    let mut contents: Vec<UnifiedContent> = Vec::new();

    for message in messages {
        let is_assistant = message.role == "assistant";
        let mut parts = Vec::new();

        match &message.content {
            ClaudeContent::String(text) => {
                if !text.is_empty() {
                    parts.push(UnifiedPart::text(text));
                }
            },
            ClaudeContent::Array(blocks) => {
                for block in blocks {
                    convert_block(
                        block,
                        &contents,
                        &resolver,
                        model,
                        session_id,
                        caches,
                        &mut parts,
                    );
                }
            },
        }

        if parts.is_empty() {
            continue;
        }

        if is_assistant {
            if enable_thinking {
                ensure_thought_part(&mut parts, &resolver);
            }
            contents.push(UnifiedContent::model(parts));
        } else {
            contents.push(UnifiedContent::user(parts));
        }
    }

    merge_consecutive_roles(contents)
}

fn convert_block(
    block: &ClaudeContentBlock,
    contents: &[UnifiedContent],
    resolver: &SignatureResolver<'_>,
    model: &str,
    session_id: &str,
    caches: &CacheRegistry,
    parts: &mut Vec<UnifiedPart>,
) {
    match block {
        ClaudeContentBlock::Text { text } => {
            if !text.is_empty() {
                parts.push(UnifiedPart::text(text));
            }
        },
        ClaudeContentBlock::Image { source } | ClaudeContentBlock::Document { source } => {
            if let Some(part) = convert_source(source) {
                parts.push(part);
            }
        },
        ClaudeContentBlock::Thinking { thinking, signature } => {
            parts.push(UnifiedPart::thought(
                thinking,
                resolver.thought_signature(signature.as_deref()),
            ));
        },
        ClaudeContentBlock::RedactedThinking { .. } => {
            // Opaque payload from another provider run: not replayable
            // upstream. The thought-injection rule keeps the turn valid.
            tracing::debug!("[Claude-Request] Dropping redacted_thinking block");
        },
        ClaudeContentBlock::ToolUse { id, name, input } => {
            let sanitized = register_tool_name(caches, session_id, model, name);
            let mut part =
                UnifiedPart::function_call(Some(id.clone()), sanitized, input.clone());
            part.thought_signature = Some(resolver.tool_signature(None));
            parts.push(part);
        },
        ClaudeContentBlock::ToolResult { tool_use_id, content, .. } => {
            let name = resolve_call_name(contents, tool_use_id);
            let output = content.as_ref().map(tool_result_text).unwrap_or_default();
            parts.push(UnifiedPart::function_response(
                Some(tool_use_id.clone()),
                name,
                json!({"result": output}),
            ));
        },
        _ => {},
    }
}

fn convert_source(source: &ClaudeSource) -> Option<UnifiedPart> {
    let media_type = source.media_type.clone().unwrap_or_else(|| "image/jpeg".to_string());
    match source.source_type.as_str() {
        "base64" => source
            .data
            .as_ref()
            .map(|data| UnifiedPart::inline_data(media_type, data.clone())),
        "url" => source
            .url
            .as_ref()
            .map(|url| UnifiedPart::file_data(url.clone(), media_type)),
        other => {
            tracing::debug!("[Claude-Request] Unsupported source type: {}", other);
            None
        },
    }
}

/// Tool results arrive as a string or an array of text blocks.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_types::protocol::claude::ClaudeRequest;
    use prism_types::unified::UnifiedRole;

    fn messages(body: Value) -> Vec<ClaudeMessage> {
        let request: ClaudeRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-5-thinking", "messages": body
        }))
        .unwrap();
        request.messages
    }

    #[test]
    fn thinking_block_keeps_carried_signature() {
        let caches = CacheRegistry::new();
        let msgs = messages(json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": [
                {"type": "thinking", "thinking": "let me see", "signature": "sig-from-client"},
                {"type": "text", "text": "hello"}
            ]}
        ]));
        let contents =
            convert_claude_messages(&msgs, true, "claude-sonnet-4-5-thinking", "-1", &caches);
        let thought = contents[1].parts.iter().find(|p| p.is_thought()).unwrap();
        assert_eq!(thought.thought_signature.as_deref(), Some("sig-from-client"));
    }

    #[test]
    fn tool_use_without_thinking_text_gets_placeholder_thought() {
        let caches = CacheRegistry::new();
        let msgs = messages(json!([
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Oslo"}}
            ]}
        ]));
        let contents =
            convert_claude_messages(&msgs, true, "claude-sonnet-4-5-thinking", "-1", &caches);
        let model_turn = &contents[1];
        assert_eq!(model_turn.role, UnifiedRole::Model);
        assert_eq!(model_turn.parts.iter().filter(|p| p.is_thought()).count(), 1);
        assert!(model_turn.parts[0].is_thought());
        assert_eq!(model_turn.parts[0].text.as_deref(), Some(" "));
        assert!(model_turn.parts[1].function_call.is_some());
    }

    #[test]
    fn tool_result_pairs_with_prior_tool_use() {
        let caches = CacheRegistry::new();
        let msgs = messages(json!([
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"}
            ]}
        ]));
        let contents =
            convert_claude_messages(&msgs, false, "claude-sonnet-4-5", "-1", &caches);
        let response = contents
            .last()
            .unwrap()
            .parts
            .iter()
            .find_map(|p| p.function_response.as_ref())
            .unwrap();
        assert_eq!(response.name, "get_weather");
        assert_eq!(response.response["result"], json!("sunny"));
    }

    #[test]
    fn base64_image_and_url_document_convert() {
        let caches = CacheRegistry::new();
        let msgs = messages(json!([
            {"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "QUJD"}},
                {"type": "document", "source": {"type": "url", "media_type": "application/pdf", "url": "https://example.com/a.pdf"}}
            ]}
        ]));
        let contents = convert_claude_messages(&msgs, false, "gemini-3-pro", "-1", &caches);
        let parts = &contents[0].parts;
        assert_eq!(parts[0].inline_data.as_ref().unwrap().mime_type, "image/png");
        assert_eq!(parts[1].file_data.as_ref().unwrap().file_uri, "https://example.com/a.pdf");
        assert_eq!(parts[1].file_data.as_ref().unwrap().mime_type, "application/pdf");
    }

    #[test]
    fn redacted_thinking_is_dropped_but_turn_stays_valid() {
        let caches = CacheRegistry::new();
        let msgs = messages(json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": [
                {"type": "redacted_thinking", "data": "opaque"},
                {"type": "text", "text": "answer"}
            ]}
        ]));
        let contents =
            convert_claude_messages(&msgs, true, "claude-sonnet-4-5-thinking", "-1", &caches);
        let model_turn = &contents[1];
        // Injected placeholder replaces the dropped block.
        assert!(model_turn.parts[0].is_thought());
        assert_eq!(model_turn.parts.len(), 2);
    }
}
