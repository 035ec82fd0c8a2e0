//! OpenAI Chat Completions surface.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

use prism_types::credential::Credential;
use prism_types::protocol::openai::OpenAiRequest;

use super::error_envelope;
use super::{acquire_token, call_upstream, sse_headers, AppState, SUPPORTED_MODELS};
use crate::config;
use crate::error::ProxyError;
use crate::proxy::mappers::generate_openai_request_body;
use crate::proxy::streaming::{to_openai_usage, StreamEvent, StreamParser};

pub async fn chat_completions(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    let request: OpenAiRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return error_envelope::openai_error(&ProxyError::Validation(format!(
                "invalid request body: {e}"
            )))
        },
    };

    let credential = match acquire_token(&state).await {
        Ok(credential) => credential,
        Err(e) => return error_envelope::openai_error(&e),
    };

    let body = match generate_openai_request_body(&request, &credential, &state.caches) {
        Ok(body) => body,
        Err(e) => return error_envelope::openai_error(&e),
    };

    let upstream = match call_upstream(&state, &body, &credential, request.stream).await {
        Ok(response) => response,
        Err(e) => return error_envelope::openai_error(&e),
    };

    if request.stream {
        stream_response(state, request.model, credential, upstream)
    } else {
        aggregate_response(state, request.model, credential, upstream).await
    }
}

pub async fn list_models(State(state): State<AppState>) -> Response {
    if let Some(cached) = state.caches.models.get("openai") {
        return Json(cached).into_response();
    }
    let created = Utc::now().timestamp();
    let body = json!({
        "object": "list",
        "data": SUPPORTED_MODELS
            .iter()
            .map(|id| json!({"id": id, "object": "model", "created": created, "owned_by": "prism"}))
            .collect::<Vec<_>>(),
    });
    state.caches.models.set("openai", body.clone());
    Json(body).into_response()
}

async fn aggregate_response(
    state: AppState,
    model: String,
    credential: Credential,
    upstream: reqwest::Response,
) -> Response {
    let body: Value = match upstream.json().await {
        Ok(body) => body,
        Err(e) => return error_envelope::openai_error(&e.into()),
    };

    let mut parser = StreamParser::new(&credential.session_id, &model, &state.caches);
    let aggregate = parser.parse_aggregate(&body);

    let mut message = json!({"role": "assistant", "content": aggregate.content});
    if !aggregate.reasoning_content.is_empty() {
        message["reasoning_content"] = json!(aggregate.reasoning_content);
    }
    let used_tools = !aggregate.tool_calls.is_empty();
    if used_tools {
        message["tool_calls"] = json!(aggregate
            .tool_calls
            .iter()
            .map(|call| json!({
                "id": call.id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments},
            }))
            .collect::<Vec<_>>());
    }

    let response = json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": map_finish_reason(parser.finish_reason(), used_tools),
        }],
        "usage": aggregate.usage.as_ref().map(to_openai_usage).unwrap_or_else(|| json!(null)),
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
        let stream_id = format!("chatcmpl-{}", Uuid::new_v4());
        let created = Utc::now().timestamp();
        let mut byte_stream = Box::pin(upstream.bytes_stream());
        let mut buffer = BytesMut::new();
        let mut used_tools = false;

        loop {
            match tokio::time::timeout(heartbeat, byte_stream.next()).await {
                // Idle upstream: keep intermediary proxies from cutting the
                // connection. Comment frames carry no protocol meaning.
                Err(_) => {
                    yield Ok::<Bytes, Infallible>(Bytes::from_static(b": keep-alive\n\n"));
                },
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!("[OpenAI-SSE] Upstream stream error: {}", e);
                    let error_chunk = json!({
                        "id": &stream_id,
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": &model,
                        "choices": [],
                        "error": {"message": "upstream stream interrupted", "type": "api_error", "code": "stream_error"},
                    });
                    yield Ok(sse_data(&error_chunk));
                    yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
                    return;
                },
                Ok(Some(Ok(bytes))) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_raw = buffer.split_to(pos + 1);
                        let Ok(line) = std::str::from_utf8(&line_raw) else { continue };
                        for event in parser.process_line(line) {
                            for frame in render_event(&event, &stream_id, created, &model, &mut used_tools) {
                                yield Ok(frame);
                            }
                        }
                    }
                },
            }
        }

        for event in parser.flush_pending() {
            for frame in render_event(&event, &stream_id, created, &model, &mut used_tools) {
                yield Ok(frame);
            }
        }

        let finish_chunk = json!({
            "id": &stream_id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": &model,
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": map_finish_reason(parser.finish_reason(), used_tools),
            }],
        });
        yield Ok(sse_data(&finish_chunk));
        yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
    };

    (sse_headers(), axum::body::Body::from_stream(stream)).into_response()
}

fn render_event(
    event: &StreamEvent,
    stream_id: &str,
    created: i64,
    model: &str,
    used_tools: &mut bool,
) -> Vec<Bytes> {
    let delta_chunk = |delta: Value| {
        sse_data(&json!({
            "id": stream_id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": Value::Null}],
        }))
    };

    match event {
        StreamEvent::Text { content } => vec![delta_chunk(json!({"content": content}))],
        StreamEvent::Reasoning { content, .. } => vec![delta_chunk(json!({
            "role": "assistant",
            "content": Value::Null,
            "reasoning_content": content,
        }))],
        StreamEvent::ToolCalls { calls } => {
            *used_tools = true;
            let rendered: Vec<Value> = calls
                .iter()
                .enumerate()
                .map(|(index, call)| json!({
                    "index": index,
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                }))
                .collect();
            vec![delta_chunk(json!({"role": "assistant", "tool_calls": rendered}))]
        },
        StreamEvent::Usage { usage } => vec![sse_data(&json!({
            "id": stream_id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [],
            "usage": to_openai_usage(usage),
        }))],
    }
}

fn sse_data(value: &Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", value))
}

fn map_finish_reason(upstream: Option<&str>, used_tools: bool) -> &'static str {
    if used_tools {
        return "tool_calls";
    }
    match upstream {
        Some("MAX_TOKENS") => "length",
        Some("SAFETY") | Some("RECITATION") => "content_filter",
        _ => "stop",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("STOP"), false), "stop");
        assert_eq!(map_finish_reason(Some("STOP"), true), "tool_calls");
        assert_eq!(map_finish_reason(Some("MAX_TOKENS"), false), "length");
        assert_eq!(map_finish_reason(Some("SAFETY"), false), "content_filter");
        assert_eq!(map_finish_reason(None, false), "stop");
    }
}
