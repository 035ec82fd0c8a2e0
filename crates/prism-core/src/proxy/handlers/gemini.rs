//! Gemini generateContent surface (pass-through with repair).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;

use prism_types::credential::Credential;
use prism_types::protocol::gemini::GeminiRequest;

use super::error_envelope;
use super::{acquire_token, call_upstream, sse_headers, AppState, SUPPORTED_MODELS};
use crate::config;
use crate::error::ProxyError;
use crate::proxy::mappers::generate_gemini_request_body;
use crate::proxy::streaming::{StreamEvent, StreamParser, ToolCallOut};

/// `POST /v1beta/models/{model}:{action}` where action is `generateContent`
/// or `streamGenerateContent`.
pub async fn generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Json(raw): Json<Value>,
) -> Response {
    let Some((model, action)) = model_action.split_once(':') else {
        return error_envelope::gemini_error(&ProxyError::Validation(format!(
            "expected model:action, got '{model_action}'"
        )));
    };
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return error_envelope::gemini_error(&ProxyError::Validation(format!(
                "unsupported action '{other}'"
            )))
        },
    };
    let model = model.to_string();

    let request: GeminiRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return error_envelope::gemini_error(&ProxyError::Validation(format!(
                "invalid request body: {e}"
            )))
        },
    };

    let credential = match acquire_token(&state).await {
        Ok(credential) => credential,
        Err(e) => return error_envelope::gemini_error(&e),
    };

    let body = match generate_gemini_request_body(&request, &model, &credential, &state.caches) {
        Ok(body) => body,
        Err(e) => return error_envelope::gemini_error(&e),
    };

    let upstream = match call_upstream(&state, &body, &credential, stream).await {
        Ok(response) => response,
        Err(e) => return error_envelope::gemini_error(&e),
    };

    if stream {
        stream_response(state, model, credential, upstream)
    } else {
        aggregate_response(state, model, credential, upstream).await
    }
}

pub async fn list_models(State(state): State<AppState>) -> Response {
    if let Some(cached) = state.caches.models.get("gemini") {
        return Json(cached).into_response();
    }
    let body = json!({
        "models": SUPPORTED_MODELS
            .iter()
            .map(|id| json!({
                "name": format!("models/{id}"),
                "displayName": id,
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
            }))
            .collect::<Vec<_>>(),
    });
    state.caches.models.set("gemini", body.clone());
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
        Err(e) => return error_envelope::gemini_error(&e.into()),
    };

    let mut parser = StreamParser::new(&credential.session_id, &model, &state.caches);
    let aggregate = parser.parse_aggregate(&body);

    let mut parts = Vec::new();
    if !aggregate.reasoning_content.is_empty() {
        let mut part = json!({"text": aggregate.reasoning_content, "thought": true});
        if let Some(signature) = &aggregate.reasoning_signature {
            part["thoughtSignature"] = json!(signature);
        }
        parts.push(part);
    }
    if !aggregate.content.is_empty() {
        parts.push(json!({"text": aggregate.content}));
    }
    for call in &aggregate.tool_calls {
        parts.push(function_call_part(call));
    }

    let mut response = json!({
        "candidates": [{
            "content": {"role": "model", "parts": parts},
            "finishReason": parser.finish_reason().unwrap_or("STOP"),
            "index": 0,
        }],
        "modelVersion": model,
    });
    if let Some(usage) = &aggregate.usage {
        response["usageMetadata"] = usage.clone();
    }

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
        let mut byte_stream = Box::pin(upstream.bytes_stream());
        let mut buffer = BytesMut::new();
        let mut last_usage: Option<Value> = None;

        loop {
            match tokio::time::timeout(heartbeat, byte_stream.next()).await {
                Err(_) => {
                    yield Ok::<Bytes, Infallible>(Bytes::from_static(b": keep-alive\n\n"));
                },
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!("[Gemini-SSE] Upstream stream error: {}", e);
                    let error_body = error_envelope::gemini_error_body(502, "upstream stream interrupted");
                    yield Ok(sse_data(&error_body));
                    return;
                },
                Ok(Some(Ok(bytes))) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_raw = buffer.split_to(pos + 1);
                        let Ok(line) = std::str::from_utf8(&line_raw) else { continue };
                        for event in parser.process_line(line) {
                            if let StreamEvent::Usage { usage } = &event {
                                last_usage = Some(usage.clone());
                                continue;
                            }
                            if let Some(chunk) = render_chunk(&event, &model) {
                                yield Ok(sse_data(&chunk));
                            }
                        }
                    }
                },
            }
        }

        for event in parser.flush_pending() {
            if let Some(chunk) = render_chunk(&event, &model) {
                yield Ok(sse_data(&chunk));
            }
        }

        let mut final_chunk = json!({
            "candidates": [{
                "content": {"role": "model", "parts": []},
                "finishReason": parser.finish_reason().unwrap_or("STOP"),
                "index": 0,
            }],
            "modelVersion": &model,
        });
        if let Some(usage) = last_usage {
            final_chunk["usageMetadata"] = usage;
        }
        yield Ok(sse_data(&final_chunk));
    };

    (sse_headers(), axum::body::Body::from_stream(stream)).into_response()
}

fn render_chunk(event: &StreamEvent, model: &str) -> Option<Value> {
    let parts = match event {
        StreamEvent::Text { content } => vec![json!({"text": content})],
        StreamEvent::Reasoning { content, signature } => {
            let mut part = json!({"text": content, "thought": true});
            if let Some(signature) = signature {
                part["thoughtSignature"] = json!(signature);
            }
            vec![part]
        },
        StreamEvent::ToolCalls { calls } => calls.iter().map(function_call_part).collect(),
        StreamEvent::Usage { .. } => return None,
    };

    Some(json!({
        "candidates": [{
            "content": {"role": "model", "parts": parts},
            "index": 0,
        }],
        "modelVersion": model,
    }))
}

fn function_call_part(call: &ToolCallOut) -> Value {
    let args: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
    json!({"functionCall": {"id": call.id, "name": call.name, "args": args}})
}

fn sse_data(value: &Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_calls_render_as_function_call_parts() {
        let event = StreamEvent::ToolCalls {
            calls: vec![ToolCallOut {
                id: "c1".into(),
                name: "original.name".into(),
                arguments: "{\"q\":\"x\"}".into(),
            }],
        };
        let chunk = render_chunk(&event, "gemini-3-pro").unwrap();
        let call = &chunk["candidates"][0]["content"]["parts"][0]["functionCall"];
        assert_eq!(call["name"], json!("original.name"));
        assert_eq!(call["args"], json!({"q": "x"}));
    }

    #[test]
    fn usage_events_do_not_render_standalone_chunks() {
        let event = StreamEvent::Usage { usage: json!({"promptTokenCount": 1}) };
        assert!(render_chunk(&event, "m").is_none());
    }
}
