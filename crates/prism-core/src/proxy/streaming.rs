//! Upstream SSE state machine.
//!
//! The upstream emits `data: {json}` lines. Each line contributes text,
//! thought or functionCall parts; tool calls are buffered and flushed as one
//! batch when the finish reason arrives, because this protocol never streams
//! partial tool-call arguments. Reasoning signatures observed mid-stream are
//! persisted into the signature cache so the *next* request in the same
//! conversation can replay a valid continuation signature.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::proxy::caches::CacheRegistry;
use crate::proxy::common::tool_names::restore_tool_name;

/// Normalized internal event, rendered by each protocol handler into its own
/// wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text { content: String },
    Reasoning { content: String, signature: Option<String> },
    /// Complete batch of tool calls for this turn, emitted once.
    ToolCalls { calls: Vec<ToolCallOut> },
    /// Terminal usage metadata (raw upstream shape).
    Usage { usage: Value },
}

/// One tool call in the caller's vocabulary: original (un-sanitized) name,
/// JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOut {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Aggregate result of a non-streaming call.
#[derive(Debug, Clone, Default)]
pub struct AggregateResponse {
    pub content: String,
    pub reasoning_content: String,
    pub reasoning_signature: Option<String>,
    pub tool_calls: Vec<ToolCallOut>,
    pub usage: Option<Value>,
}

/// Per-request stream state. Created at request start, dropped at stream end,
/// never shared across requests.
pub struct StreamParser<'a> {
    session_id: String,
    model: String,
    caches: &'a CacheRegistry,
    pending_tool_calls: Vec<ToolCallOut>,
    reasoning_signature: Option<String>,
    last_usage: Option<Value>,
    finish_reason: Option<String>,
}

impl<'a> StreamParser<'a> {
    pub fn new(session_id: impl Into<String>, model: impl Into<String>, caches: &'a CacheRegistry) -> Self {
        Self {
            session_id: session_id.into(),
            model: model.into(),
            caches,
            pending_tool_calls: Vec::new(),
            reasoning_signature: None,
            last_usage: None,
            finish_reason: None,
        }
    }

    /// Finish reason reported by the upstream, once seen.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn reasoning_signature(&self) -> Option<&str> {
        self.reasoning_signature.as_deref()
    }

    /// Consume one SSE line. Unparseable lines are keep-alives or framing
    /// noise and are silently discarded.
    pub fn process_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let line = line.trim();
        let Some(payload) = line.strip_prefix("data: ") else {
            return Vec::new();
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return Vec::new();
        }

        let Ok(parsed) = serde_json::from_str::<Value>(payload) else {
            tracing::trace!("[StreamParser] Skipping non-JSON data line");
            return Vec::new();
        };

        self.process_chunk(&parsed)
    }

    /// Consume one parsed upstream chunk (`{"response": {...}}` or bare).
    pub fn process_chunk(&mut self, chunk: &Value) -> Vec<StreamEvent> {
        let data = chunk.get("response").unwrap_or(chunk);
        let mut events = Vec::new();

        if let Some(usage) = data.get("usageMetadata") {
            self.last_usage = Some(usage.clone());
        }

        let candidate = data.get("candidates").and_then(|c| c.get(0));
        let parts = candidate
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array);

        if let Some(parts) = parts {
            for part in parts {
                self.process_part(part, &mut events);
            }
        }

        if let Some(reason) = candidate.and_then(|c| c.get("finishReason")).and_then(Value::as_str)
        {
            self.finish_reason = Some(reason.to_string());
            if !self.pending_tool_calls.is_empty() {
                events.push(StreamEvent::ToolCalls {
                    calls: std::mem::take(&mut self.pending_tool_calls),
                });
            }
            if let Some(usage) = self.last_usage.take() {
                events.push(StreamEvent::Usage { usage });
            }
        }

        events
    }

    fn process_part(&mut self, part: &Value, events: &mut Vec<StreamEvent>) {
        let signature = part
            .get("thoughtSignature")
            .or_else(|| part.get("thought_signature"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
            if let Some(sig) = &signature {
                self.reasoning_signature = Some(sig.clone());
                self.caches.signatures.set_reasoning_signature(
                    &self.session_id,
                    &self.model,
                    sig.clone(),
                );
            }
            let content = part.get("text").and_then(Value::as_str).unwrap_or_default();
            events.push(StreamEvent::Reasoning {
                content: content.to_string(),
                signature,
            });
            return;
        }

        if let Some(call) = part.get("functionCall") {
            if let Some(sig) = &signature {
                self.caches.signatures.set_tool_signature(&self.session_id, &self.model, sig.clone());
            }
            let sanitized = call.get("name").and_then(Value::as_str).unwrap_or("tool");
            let name = restore_tool_name(self.caches, &self.session_id, &self.model, sanitized);
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            let arguments = call.get("args").cloned().unwrap_or_else(|| json!({})).to_string();
            // Buffered, not emitted: callers receive the complete batch at
            // turn end.
            self.pending_tool_calls.push(ToolCallOut { id, name, arguments });
            return;
        }

        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(StreamEvent::Text { content: text.to_string() });
            }
            return;
        }

        // Image-generation responses inline the payload; surface it as a
        // markdown data URL the way chat clients expect.
        if let Some(inline) = part.get("inlineData") {
            let mime_type =
                inline.get("mimeType").and_then(Value::as_str).unwrap_or("image/png");
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if !data.is_empty() {
                events.push(StreamEvent::Text {
                    content: format!("![image](data:{};base64,{})", mime_type, data),
                });
            }
        }
    }

    /// Drain buffered tool calls at EOF for streams that never reported a
    /// finish reason (upstream cut the connection).
    pub fn flush_pending(&mut self) -> Vec<StreamEvent> {
        if self.pending_tool_calls.is_empty() {
            return Vec::new();
        }
        vec![StreamEvent::ToolCalls { calls: std::mem::take(&mut self.pending_tool_calls) }]
    }

    /// Map a complete non-streaming response body to an aggregate result.
    pub fn parse_aggregate(&mut self, body: &Value) -> AggregateResponse {
        let mut aggregate = AggregateResponse::default();
        for event in self.process_chunk(body) {
            match event {
                StreamEvent::Text { content } => aggregate.content.push_str(&content),
                StreamEvent::Reasoning { content, signature } => {
                    aggregate.reasoning_content.push_str(&content);
                    if signature.is_some() {
                        aggregate.reasoning_signature = signature;
                    }
                },
                StreamEvent::ToolCalls { calls } => aggregate.tool_calls.extend(calls),
                StreamEvent::Usage { usage } => aggregate.usage = Some(usage),
            }
        }
        for event in self.flush_pending() {
            if let StreamEvent::ToolCalls { calls } = event {
                aggregate.tool_calls.extend(calls);
            }
        }
        if aggregate.reasoning_signature.is_none() {
            aggregate.reasoning_signature = self.reasoning_signature.clone();
        }
        aggregate
    }
}

/// usageMetadata → OpenAI usage object.
pub fn to_openai_usage(usage: &Value) -> Value {
    let prompt = usage.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
    let completion = usage.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0);
    let thoughts = usage.get("thoughtsTokenCount").and_then(Value::as_u64).unwrap_or(0);
    json!({
        "prompt_tokens": prompt,
        "completion_tokens": completion + thoughts,
        "total_tokens": usage
            .get("totalTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(prompt + completion + thoughts),
    })
}

/// usageMetadata → Claude usage object.
pub fn to_claude_usage(usage: &Value) -> Value {
    let output = usage.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0)
        + usage.get("thoughtsTokenCount").and_then(Value::as_u64).unwrap_or(0);
    json!({
        "input_tokens": usage.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
        "output_tokens": output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_line(value: Value) -> String {
        format!("data: {}", value)
    }

    #[test]
    fn text_and_reasoning_deltas_emit_immediately() {
        let caches = CacheRegistry::new();
        let mut parser = StreamParser::new("-1", "gemini-3-pro", &caches);

        let events = parser.process_line(&data_line(json!({
            "response": {"candidates": [{"content": {"parts": [
                {"text": "deliberating", "thought": true, "thoughtSignature": "sig-live"},
                {"text": "Hello"}
            ]}}]}
        })));

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            StreamEvent::Reasoning {
                content: "deliberating".into(),
                signature: Some("sig-live".into())
            }
        );
        assert_eq!(events[1], StreamEvent::Text { content: "Hello".into() });
        // Signature persisted for the next request in this conversation.
        assert_eq!(
            caches.signatures.get_reasoning_signature("-1", "gemini-3-pro").as_deref(),
            Some("sig-live")
        );
    }

    #[test]
    fn tool_calls_batch_on_finish_reason() {
        let caches = CacheRegistry::new();
        let mut parser = StreamParser::new("-1", "gemini-3-pro", &caches);

        let first = parser.process_line(&data_line(json!({
            "response": {"candidates": [{"content": {"parts": [
                {"functionCall": {"id": "c1", "name": "alpha", "args": {"x": 1}}}
            ]}}]}
        })));
        assert!(first.is_empty(), "tool calls must not be emitted individually");

        let second = parser.process_line(&data_line(json!({
            "response": {"candidates": [{"content": {"parts": [
                {"functionCall": {"id": "c2", "name": "beta", "args": {}}}
            ]}}]}
        })));
        assert!(second.is_empty());

        let finish = parser.process_line(&data_line(json!({
            "response": {"candidates": [{"finishReason": "STOP"}]}
        })));

        let batches: Vec<_> = finish
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCalls { .. }))
            .collect();
        assert_eq!(batches.len(), 1, "exactly one batched tool_calls event");
        if let StreamEvent::ToolCalls { calls } = batches[0] {
            assert_eq!(calls.len(), 2);
            assert_eq!(calls[0].id, "c1");
            assert_eq!(calls[0].name, "alpha");
            assert_eq!(calls[1].id, "c2");
        }
        assert_eq!(parser.finish_reason(), Some("STOP"));
    }

    #[test]
    fn tool_call_names_are_restored_from_cache() {
        let caches = CacheRegistry::new();
        caches.tool_names.record("-1", "gemini-3-pro", "mcpsearch", "mcp.search");
        let mut parser = StreamParser::new("-1", "gemini-3-pro", &caches);

        parser.process_line(&data_line(json!({
            "response": {"candidates": [{"content": {"parts": [
                {"functionCall": {"name": "mcpsearch", "args": {}}}
            ]}}]}
        })));
        let events = parser.process_line(&data_line(json!({
            "response": {"candidates": [{"finishReason": "STOP"}]}
        })));

        if let Some(StreamEvent::ToolCalls { calls }) = events.first() {
            assert_eq!(calls[0].name, "mcp.search");
            assert!(calls[0].id.starts_with("call_"));
        } else {
            panic!("expected tool_calls batch");
        }
    }

    #[test]
    fn garbage_lines_are_silently_skipped() {
        let caches = CacheRegistry::new();
        let mut parser = StreamParser::new("-1", "m", &caches);
        assert!(parser.process_line(": keep-alive").is_empty());
        assert!(parser.process_line("data: not json {{").is_empty());
        assert!(parser.process_line("data: [DONE]").is_empty());
        assert!(parser.process_line("").is_empty());
    }

    #[test]
    fn usage_emitted_with_finish_even_when_seen_earlier() {
        let caches = CacheRegistry::new();
        let mut parser = StreamParser::new("-1", "m", &caches);

        let early = parser.process_line(&data_line(json!({
            "response": {
                "usageMetadata": {"promptTokenCount": 5},
                "candidates": [{"content": {"parts": [{"text": "hi"}]}}]
            }
        })));
        assert_eq!(early.len(), 1, "usage is held until finish");

        let finish = parser.process_line(&data_line(json!({
            "response": {"candidates": [{"finishReason": "STOP"}]}
        })));
        assert!(finish
            .iter()
            .any(|e| matches!(e, StreamEvent::Usage { usage } if usage["promptTokenCount"] == json!(5))));
    }

    #[test]
    fn aggregate_collects_all_channels() {
        let caches = CacheRegistry::new();
        let mut parser = StreamParser::new("-1", "claude-sonnet-4-5-thinking", &caches);

        let body = json!({
            "response": {
                "candidates": [{
                    "content": {"parts": [
                        {"text": "pondering", "thought": true, "thoughtSignature": "agg-sig"},
                        {"text": "result text"},
                        {"functionCall": {"id": "c9", "name": "fin", "args": {"n": 2}}}
                    ]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 7}
            }
        });

        let aggregate = parser.parse_aggregate(&body);
        assert_eq!(aggregate.content, "result text");
        assert_eq!(aggregate.reasoning_content, "pondering");
        assert_eq!(aggregate.reasoning_signature.as_deref(), Some("agg-sig"));
        assert_eq!(aggregate.tool_calls.len(), 1);
        assert_eq!(aggregate.tool_calls[0].arguments, "{\"n\":2}");
        assert!(aggregate.usage.is_some());
    }

    #[test]
    fn usage_mappers_shape_protocol_objects() {
        let usage = json!({
            "promptTokenCount": 10,
            "candidatesTokenCount": 20,
            "thoughtsTokenCount": 5,
            "totalTokenCount": 35
        });
        assert_eq!(
            to_openai_usage(&usage),
            json!({"prompt_tokens": 10, "completion_tokens": 25, "total_tokens": 35})
        );
        assert_eq!(to_claude_usage(&usage), json!({"input_tokens": 10, "output_tokens": 25}));
    }
}
