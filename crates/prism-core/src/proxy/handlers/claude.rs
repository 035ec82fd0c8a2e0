//! Anthropic Messages surface.
//!
//! Claude streaming is a named-event SSE protocol with explicit content-block
//! framing; the renderer tracks the open block and its index the whole way.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

use prism_types::credential::Credential;
use prism_types::protocol::claude::ClaudeRequest;

use super::error_envelope;
use super::{acquire_token, call_upstream, sse_headers, AppState};
use crate::config;
use crate::error::ProxyError;
use crate::proxy::mappers::generate_claude_request_body;
use crate::proxy::streaming::{to_claude_usage, StreamEvent, StreamParser};

pub async fn messages(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    let request: ClaudeRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return error_envelope::claude_error(&ProxyError::Validation(format!(
                "invalid request body: {e}"
            )))
        },
    };

    let credential = match acquire_token(&state).await {
        Ok(credential) => credential,
        Err(e) => return error_envelope::claude_error(&e),
    };

    let body = match generate_claude_request_body(&request, &credential, &state.caches) {
        Ok(body) => body,
        Err(e) => return error_envelope::claude_error(&e),
    };

    let upstream = match call_upstream(&state, &body, &credential, request.stream).await {
        Ok(response) => response,
        Err(e) => return error_envelope::claude_error(&e),
    };

    if request.stream {
        stream_response(state, request.model, credential, upstream)
    } else {
        aggregate_response(state, request.model, credential, upstream).await
    }
}

async fn aggregate_response(
    state: AppState,
    model: String,
    credential: Credential,
    upstream: reqwest::Response,
) -> Response {
    let body: Value = match upstream.json().await {
        Ok(body) => body,
        Err(e) => return error_envelope::claude_error(&e.into()),
    };

    let mut parser = StreamParser::new(&credential.session_id, &model, &state.caches);
    let aggregate = parser.parse_aggregate(&body);

    let mut content = Vec::new();
    if !aggregate.reasoning_content.is_empty() {
        let mut block = json!({"type": "thinking", "thinking": aggregate.reasoning_content});
        if let Some(signature) = &aggregate.reasoning_signature {
            block["signature"] = json!(signature);
        }
        content.push(block);
    }
    if !aggregate.content.is_empty() {
        content.push(json!({"type": "text", "text": aggregate.content}));
    }
    for call in &aggregate.tool_calls {
        let input: Value =
            serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
        content.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": input,
        }));
    }

    let stop_reason =
        map_stop_reason(parser.finish_reason(), !aggregate.tool_calls.is_empty());
    let response = json!({
        "id": format!("msg_{}", Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": aggregate
            .usage
            .as_ref()
            .map(to_claude_usage)
            .unwrap_or_else(|| json!({"input_tokens": 0, "output_tokens": 0})),
    });

    Json(response).into_response()
}

fn stream_response(
    state: AppState,
    model: String,
    credential: Credential,
    upstream: reqwest::Response,
) -> Response {
    let heartbeat = Duration::from_secs(config::get_config().heartbeat_interval_secs);

    let stream = async_stream::stream! {
        let caches = state.caches.clone();
        let mut parser = StreamParser::new(&credential.session_id, &model, caches.as_ref());
        let mut renderer = ClaudeRenderer::new();
        let mut byte_stream = Box::pin(upstream.bytes_stream());
        let mut buffer = BytesMut::new();

        for frame in renderer.message_start(&model) {
            yield Ok::<Bytes, Infallible>(frame);
        }

        loop {
            match tokio::time::timeout(heartbeat, byte_stream.next()).await {
                Err(_) => {
                    yield Ok(sse_event("ping", &json!({"type": "ping"})));
                },
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!("[Claude-SSE] Upstream stream error: {}", e);
                    yield Ok(sse_event(
                        "error",
                        &json!({"type": "error", "error": {"type": "api_error", "message": "upstream stream interrupted"}}),
                    ));
                    return;
                },
                Ok(Some(Ok(bytes))) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_raw = buffer.split_to(pos + 1);
                        let Ok(line) = std::str::from_utf8(&line_raw) else { continue };
                        for event in parser.process_line(line) {
                            for frame in renderer.on_event(&event) {
                                yield Ok(frame);
                            }
                        }
                    }
                },
            }
        }

        for event in parser.flush_pending() {
            for frame in renderer.on_event(&event) {
                yield Ok(frame);
            }
        }
        for frame in renderer.finish(parser.finish_reason()) {
            yield Ok(frame);
        }
    };

    (sse_headers(), axum::body::Body::from_stream(stream)).into_response()
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum OpenBlock {
    Thinking,
    Text,
}

struct ClaudeRenderer {
    block_index: usize,
    open: Option<OpenBlock>,
    /// Signature observed on the thinking stream, emitted as a
    /// signature_delta just before the block closes.
    thinking_signature: Option<String>,
    usage: Option<Value>,
    used_tools: bool,
}

impl ClaudeRenderer {
    fn new() -> Self {
        Self {
            block_index: 0,
            open: None,
            thinking_signature: None,
            usage: None,
            used_tools: false,
        }
    }

    fn message_start(&mut self, model: &str) -> Vec<Bytes> {
        let message = json!({
            "id": format!("msg_{}", Uuid::new_v4().simple()),
            "type": "message",
            "role": "assistant",
            "model": model,
            "content": [],
            "stop_reason": Value::Null,
            "stop_sequence": Value::Null,
            "usage": {"input_tokens": 0, "output_tokens": 0},
        });
        vec![sse_event("message_start", &json!({"type": "message_start", "message": message}))]
    }

    fn on_event(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        match event {
            StreamEvent::Reasoning { content, signature } => {
                let mut frames = Vec::new();
                if self.open != Some(OpenBlock::Thinking) {
                    frames.extend(self.close_open_block());
                    frames.push(sse_event(
                        "content_block_start",
                        &json!({
                            "type": "content_block_start",
                            "index": self.block_index,
                            "content_block": {"type": "thinking", "thinking": ""},
                        }),
                    ));
                    self.open = Some(OpenBlock::Thinking);
                }
                if !content.is_empty() {
                    frames.push(sse_event(
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "thinking_delta", "thinking": content},
                        }),
                    ));
                }
                if let Some(signature) = signature {
                    self.thinking_signature = Some(signature.clone());
                }
                frames
            },
            StreamEvent::Text { content } => {
                let mut frames = Vec::new();
                if self.open != Some(OpenBlock::Text) {
                    frames.extend(self.close_open_block());
                    frames.push(sse_event(
                        "content_block_start",
                        &json!({
                            "type": "content_block_start",
                            "index": self.block_index,
                            "content_block": {"type": "text", "text": ""},
                        }),
                    ));
                    self.open = Some(OpenBlock::Text);
                }
                frames.push(sse_event(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": self.block_index,
                        "delta": {"type": "text_delta", "text": content},
                    }),
                ));
                frames
            },
            StreamEvent::ToolCalls { calls } => {
                let mut frames = self.close_open_block();
                self.used_tools = true;
                for call in calls {
                    frames.push(sse_event(
                        "content_block_start",
                        &json!({
                            "type": "content_block_start",
                            "index": self.block_index,
                            "content_block": {"type": "tool_use", "id": call.id, "name": call.name, "input": {}},
                        }),
                    ));
                    // Arguments arrive whole, never incrementally: one delta.
                    frames.push(sse_event(
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "input_json_delta", "partial_json": call.arguments},
                        }),
                    ));
                    frames.push(sse_event(
                        "content_block_stop",
                        &json!({"type": "content_block_stop", "index": self.block_index}),
                    ));
                    self.block_index += 1;
                }
                frames
            },
            StreamEvent::Usage { usage } => {
                self.usage = Some(usage.clone());
                Vec::new()
            },
        }
    }

    fn close_open_block(&mut self) -> Vec<Bytes> {
        let Some(open) = self.open.take() else { return Vec::new() };
        let mut frames = Vec::new();
        if open == OpenBlock::Thinking {
            if let Some(signature) = self.thinking_signature.take() {
                frames.push(sse_event(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": self.block_index,
                        "delta": {"type": "signature_delta", "signature": signature},
                    }),
                ));
            }
        }
        frames.push(sse_event(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": self.block_index}),
        ));
        self.block_index += 1;
        frames
    }

    fn finish(&mut self, finish_reason: Option<&str>) -> Vec<Bytes> {
        let mut frames = self.close_open_block();
        frames.push(sse_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": map_stop_reason(finish_reason, self.used_tools),
                    "stop_sequence": Value::Null,
                },
                "usage": self
                    .usage
                    .as_ref()
                    .map(to_claude_usage)
                    .unwrap_or_else(|| json!({"input_tokens": 0, "output_tokens": 0})),
            }),
        ));
        frames.push(sse_event("message_stop", &json!({"type": "message_stop"})));
        frames
    }
}

fn sse_event(event: &str, data: &Value) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", event, data))
}

fn map_stop_reason(upstream: Option<&str>, used_tools: bool) -> &'static str {
    if used_tools {
        return "tool_use";
    }
    match upstream {
        Some("MAX_TOKENS") => "max_tokens",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_to_string(frames: &[Bytes]) -> String {
        frames.iter().map(|b| String::from_utf8_lossy(b).into_owned()).collect()
    }

    #[test]
    fn thinking_block_emits_signature_before_stop() {
        let mut renderer = ClaudeRenderer::new();
        renderer.on_event(&StreamEvent::Reasoning {
            content: "hmm".into(),
            signature: Some("sig-1".into()),
        });
        let frames = renderer.on_event(&StreamEvent::Text { content: "answer".into() });
        let raw = frames_to_string(&frames);

        let signature_pos = raw.find("signature_delta").unwrap();
        let stop_pos = raw.find("content_block_stop").unwrap();
        let text_start_pos = raw.find("\"type\":\"text\"").unwrap();
        assert!(signature_pos < stop_pos);
        assert!(stop_pos < text_start_pos);
    }

    #[test]
    fn tool_calls_render_as_complete_blocks() {
        let mut renderer = ClaudeRenderer::new();
        let frames = renderer.on_event(&StreamEvent::ToolCalls {
            calls: vec![
                crate::proxy::streaming::ToolCallOut {
                    id: "c1".into(),
                    name: "alpha".into(),
                    arguments: "{\"x\":1}".into(),
                },
                crate::proxy::streaming::ToolCallOut {
                    id: "c2".into(),
                    name: "beta".into(),
                    arguments: "{}".into(),
                },
            ],
        });
        let raw = frames_to_string(&frames);
        assert_eq!(raw.matches("content_block_start").count(), 2);
        assert_eq!(raw.matches("input_json_delta").count(), 2);
        assert_eq!(raw.matches("content_block_stop").count(), 2);

        let finish = frames_to_string(&renderer.finish(Some("STOP")));
        assert!(finish.contains("\"stop_reason\":\"tool_use\""));
        assert!(finish.contains("message_stop"));
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason(Some("STOP"), false), "end_turn");
        assert_eq!(map_stop_reason(Some("MAX_TOKENS"), false), "max_tokens");
        assert_eq!(map_stop_reason(Some("STOP"), true), "tool_use");
    }
}
