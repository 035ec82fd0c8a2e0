//! OpenAI Chat Completions conversation → unified contents.

use serde_json::{json, Value};

use prism_types::protocol::openai::{
    OpenAiContent, OpenAiContentBlock, OpenAiImageUrl, OpenAiMessage,
};
use prism_types::unified::{UnifiedContent, UnifiedPart};

use super::{ensure_thought_part, merge_consecutive_roles, resolve_call_name, SignatureResolver};
use crate::proxy::caches::CacheRegistry;
use crate::proxy::common::tool_names::{register_tool_name, sanitize_tool_name};

/// Flatten message content to plain text (used for system prompts).
pub(crate) fn content_text(content: &OpenAiContent) -> String {
    match content {
        OpenAiContent::String(s) => s.clone(),
        OpenAiContent::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                OpenAiContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

pub fn convert_openai_messages(
    messages: &[OpenAiMessage],
    enable_thinking: bool,
    model: &str,
    session_id: &str,
    caches: &CacheRegistry,
) -> Vec<UnifiedContent> {
    let resolver = SignatureResolver::new(caches, session_id, model);
    let mut contents: Vec<UnifiedContent> = Vec::new();

    for message in messages {
        match message.role.as_str() {
            "system" | "developer" => continue,
            "assistant" => {
                let parts = convert_assistant_message(
                    message,
                    enable_thinking,
                    model,
                    session_id,
                    caches,
                    &resolver,
                );
                if !parts.is_empty() {
                    contents.push(UnifiedContent::model(parts));
                }
            },
            "tool" | "function" => {
                let parts = convert_tool_result(message, &contents);
                if !parts.is_empty() {
                    contents.push(UnifiedContent::user(parts));
                }
            },
            _ => {
                let parts = message
                    .content
                    .as_ref()
                    .map(convert_user_content)
                    .unwrap_or_default();
                if !parts.is_empty() {
                    contents.push(UnifiedContent::user(parts));
                }
            },
        }
    }

    merge_consecutive_roles(contents)
}

fn convert_user_content(content: &OpenAiContent) -> Vec<UnifiedPart> {
    match content {
        OpenAiContent::String(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![UnifiedPart::text(text)]
            }
        },
        OpenAiContent::Array(blocks) => blocks.iter().filter_map(convert_content_block).collect(),
    }
}

fn convert_content_block(block: &OpenAiContentBlock) -> Option<UnifiedPart> {
    match block {
        OpenAiContentBlock::Text { text } => Some(UnifiedPart::text(text)),
        OpenAiContentBlock::ImageUrl { image_url } => convert_image_url(image_url),
        OpenAiContentBlock::InputAudio { input_audio } => {
            let mime_type = match input_audio.format.as_str() {
                "wav" => "audio/wav",
                "mp3" => "audio/mp3",
                "ogg" => "audio/ogg",
                "flac" => "audio/flac",
                "m4a" | "aac" => "audio/aac",
                _ => "audio/wav",
            };
            Some(UnifiedPart::inline_data(mime_type, input_audio.data.clone()))
        },
        _ => None,
    }
}

fn convert_image_url(image_url: &OpenAiImageUrl) -> Option<UnifiedPart> {
    if let Some(rest) = image_url.url.strip_prefix("data:") {
        let comma = rest.find(',')?;
        let mime_type = rest[..comma].split(';').next().unwrap_or("image/jpeg");
        let data = &rest[comma + 1..];
        return Some(UnifiedPart::inline_data(mime_type, data));
    }
    if image_url.url.starts_with("http") {
        return Some(UnifiedPart::file_data(image_url.url.clone(), "image/jpeg"));
    }
    tracing::debug!("[OpenAI-Request] Dropping unsupported image url scheme");
    None
}

fn convert_assistant_message(
    message: &OpenAiMessage,
    enable_thinking: bool,
    model: &str,
    session_id: &str,
    caches: &CacheRegistry,
    resolver: &SignatureResolver<'_>,
) -> Vec<UnifiedPart> {
    let mut parts = Vec::new();

    if let Some(reasoning) = message.reasoning_content.as_deref().filter(|s| !s.is_empty()) {
        parts.push(UnifiedPart::thought(reasoning, resolver.thought_signature(None)));
    }

    if let Some(content) = &message.content {
        let text = content_text(content);
        if !text.is_empty() {
            parts.push(UnifiedPart::text(text));
        }
    }

    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            let sanitized = register_tool_name(caches, session_id, model, &call.function.name);
            let args = serde_json::from_str::<Value>(&call.function.arguments)
                .unwrap_or_else(|_| json!({}));
            let mut part =
                UnifiedPart::function_call(Some(call.id.clone()), sanitized, args);
            part.thought_signature = Some(resolver.tool_signature(None));
            parts.push(part);
        }
    }

    if enable_thinking && !parts.is_empty() {
        ensure_thought_part(&mut parts, resolver);
    }

    parts
}

fn convert_tool_result(message: &OpenAiMessage, contents: &[UnifiedContent]) -> Vec<UnifiedPart> {
    let call_id = message.tool_call_id.clone().unwrap_or_default();

    let mut name = resolve_call_name(contents, &call_id);
    if name.is_empty() {
        if let Some(declared) = message.name.as_deref().filter(|n| !n.is_empty()) {
            name = sanitize_tool_name(declared);
        }
    }

    let output = message.content.as_ref().map(content_text).unwrap_or_default();

    vec![UnifiedPart::function_response(
        (!call_id.is_empty()).then_some(call_id),
        name,
        json!({"result": output}),
    )]
}
