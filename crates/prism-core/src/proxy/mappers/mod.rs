//! Per-protocol request conversion into the unified upstream body.
//!
//! Each `generate_*_request_body` entry point is the seam the thin HTTP
//! handlers call: protocol request in, complete upstream envelope out.

pub mod claude;
pub mod gemini;
pub mod openai;

use serde_json::{json, Value};
use uuid::Uuid;

use prism_types::credential::Credential;
use prism_types::protocol::claude::ClaudeRequest;
use prism_types::protocol::gemini::GeminiRequest;
use prism_types::protocol::openai::OpenAiRequest;
use prism_types::unified::{UnifiedContent, UnifiedPart};

use crate::config;
use crate::error::{ProxyError, ProxyResult};
use crate::proxy::caches::CacheRegistry;
use crate::proxy::common::json_schema::clean_parameters;
use crate::proxy::common::model_family::{is_thinking_variant, ModelFamily};
use crate::proxy::common::tool_names::register_tool_name;
use crate::proxy::params::{
    normalize_claude_parameters, normalize_gemini_parameters, normalize_openai_parameters,
    to_generation_config,
};

/// Resolves continuation signatures for synthesized thought and function-call
/// parts: client-carried value first, then the session cache, then the
/// model-family fallback constant.
pub(crate) struct SignatureResolver<'a> {
    caches: &'a CacheRegistry,
    session_id: &'a str,
    model: &'a str,
    family: ModelFamily,
}

impl<'a> SignatureResolver<'a> {
    pub fn new(caches: &'a CacheRegistry, session_id: &'a str, model: &'a str) -> Self {
        Self { caches, session_id, model, family: ModelFamily::from_model_name(model) }
    }

    pub fn thought_signature(&self, carried: Option<&str>) -> String {
        if let Some(sig) = carried.filter(|s| !s.is_empty()) {
            return sig.to_string();
        }
        self.caches
            .signatures
            .get_reasoning_signature(self.session_id, self.model)
            .unwrap_or_else(|| self.family.fallback_thought_signature().to_string())
    }

    pub fn tool_signature(&self, carried: Option<&str>) -> String {
        if let Some(sig) = carried.filter(|s| !s.is_empty()) {
            return sig.to_string();
        }
        self.caches
            .signatures
            .get_tool_signature(self.session_id, self.model)
            .unwrap_or_else(|| self.family.fallback_tool_signature().to_string())
    }
}

/// Upstream requires a thought part on every model turn while thinking is
/// enabled, even when the source turn had no reasoning text. Injects a
/// single-space placeholder carrying the resolved signature, ahead of any
/// function calls.
pub(crate) fn ensure_thought_part(parts: &mut Vec<UnifiedPart>, resolver: &SignatureResolver<'_>) {
    if parts.iter().any(UnifiedPart::is_thought) {
        return;
    }
    parts.insert(0, UnifiedPart::thought(" ", resolver.thought_signature(None)));
}

/// Upstream rejects two consecutive messages with the same role; fold their
/// parts together instead.
pub(crate) fn merge_consecutive_roles(contents: Vec<UnifiedContent>) -> Vec<UnifiedContent> {
    let mut merged: Vec<UnifiedContent> = Vec::new();
    for message in contents {
        if let Some(last) = merged.last_mut() {
            if last.role == message.role {
                last.parts.extend(message.parts);
                continue;
            }
        }
        merged.push(message);
    }
    merged
}

/// Resolve the function name for a tool result by scanning backward through
/// already-converted messages for the matching call id. Unresolvable names
/// are emitted as empty string, never an error.
pub(crate) fn resolve_call_name(contents: &[UnifiedContent], call_id: &str) -> String {
    for message in contents.iter().rev() {
        for part in message.parts.iter().rev() {
            if let Some(call) = &part.function_call {
                if call.id.as_deref() == Some(call_id) {
                    return call.name.clone();
                }
            }
        }
    }
    tracing::debug!("[Mappers] No originating functionCall for tool result id={}", call_id);
    String::new()
}

/// Build upstream function declarations from client tool definitions.
/// Handles the OpenAI nested shape (`{function: {name, parameters}}`), the
/// flat Claude shape (`{name, input_schema}`) and the Gemini native shape
/// (`{functionDeclarations: [...]}`).
pub(crate) fn build_function_declarations(
    tools: &[Value],
    caches: &CacheRegistry,
    session_id: &str,
    model: &str,
) -> Vec<Value> {
    let mut declarations = Vec::new();
    for tool in tools {
        if let Some(nested) = tool.get("functionDeclarations").and_then(Value::as_array) {
            for declaration in nested {
                if let Some(decl) = build_declaration(declaration, caches, session_id, model) {
                    declarations.push(decl);
                }
            }
            continue;
        }
        let source = tool.get("function").unwrap_or(tool);
        if let Some(decl) = build_declaration(source, caches, session_id, model) {
            declarations.push(decl);
        }
    }
    declarations
}

fn build_declaration(
    source: &Value,
    caches: &CacheRegistry,
    session_id: &str,
    model: &str,
) -> Option<Value> {
    let name = source.get("name").and_then(Value::as_str)?;
    let sanitized = register_tool_name(caches, session_id, model, name);

    let parameters = source
        .get("parameters")
        .or_else(|| source.get("input_schema"))
        .map(clean_parameters)
        .unwrap_or_else(|| json!({"type": "object"}));

    let mut declaration = json!({
        "name": sanitized,
        "parameters": parameters,
    });
    if let Some(description) = source.get("description").and_then(Value::as_str) {
        declaration["description"] = json!(description);
    }
    Some(declaration)
}

/// Merge the configured base system instruction with the caller's system
/// prompt. With `append_system_instruction` the two are concatenated
/// (double-newline separated); otherwise the base overrides the caller.
pub(crate) fn merge_system_instruction(caller: Option<String>) -> Option<String> {
    let cfg = config::get_config();
    let caller = caller.filter(|s| !s.is_empty());
    match (cfg.system_instruction.filter(|s| !s.is_empty()), caller) {
        (Some(base), Some(caller)) if cfg.append_system_instruction => {
            Some(format!("{base}\n\n{caller}"))
        },
        (Some(base), _) => Some(base),
        (None, caller) => caller,
    }
}

fn build_inner_request(
    contents: Vec<UnifiedContent>,
    system_text: Option<String>,
    generation_config: Value,
    function_declarations: Vec<Value>,
) -> ProxyResult<Value> {
    let mut inner = json!({
        "contents": serde_json::to_value(contents)?,
        "generationConfig": generation_config,
        "safetySettings": [
            { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "OFF" },
            { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "OFF" },
            { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "OFF" },
            { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "OFF" },
        ]
    });

    if let Some(system) = system_text {
        inner["systemInstruction"] = json!({
            "role": "user",
            "parts": [{"text": system}]
        });
    }
    if !function_declarations.is_empty() {
        inner["tools"] = json!([{ "functionDeclarations": function_declarations }]);
    }
    Ok(inner)
}

fn build_envelope(credential: &Credential, model: &str, inner: Value) -> Value {
    json!({
        "project": credential.project_id.clone().unwrap_or_default(),
        "requestId": format!("prism-{}", Uuid::new_v4()),
        "request": inner,
        "model": model,
    })
}

/// OpenAI Chat Completions → upstream envelope.
pub fn generate_openai_request_body(
    request: &OpenAiRequest,
    credential: &Credential,
    caches: &CacheRegistry,
) -> ProxyResult<Value> {
    if request.messages.is_empty() {
        return Err(ProxyError::Validation("messages is required".to_string()));
    }

    let model = request.model.as_str();
    let session_id = credential.session_id.as_str();
    let enable_thinking = is_thinking_variant(model) || request.reasoning_effort.is_some();

    let system_text = {
        let collected: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == "system" || m.role == "developer")
            .filter_map(|m| m.content.as_ref().map(openai::content_text))
            .filter(|s| !s.is_empty())
            .collect();
        merge_system_instruction(
            (!collected.is_empty()).then(|| collected.join("\n")),
        )
    };

    let contents =
        openai::convert_openai_messages(&request.messages, enable_thinking, model, session_id, caches);

    let params = normalize_openai_parameters(request);
    let generation_config = to_generation_config(&params, enable_thinking, model);

    let declarations = request
        .tools
        .as_deref()
        .map(|tools| build_function_declarations(tools, caches, session_id, model))
        .unwrap_or_default();

    let inner = build_inner_request(contents, system_text, generation_config, declarations)?;
    Ok(build_envelope(credential, model, inner))
}

/// Anthropic Messages → upstream envelope.
pub fn generate_claude_request_body(
    request: &ClaudeRequest,
    credential: &Credential,
    caches: &CacheRegistry,
) -> ProxyResult<Value> {
    if request.messages.is_empty() {
        return Err(ProxyError::Validation("messages is required".to_string()));
    }

    let model = request.model.as_str();
    let session_id = credential.session_id.as_str();
    let enable_thinking = request
        .thinking
        .as_ref()
        .map(|t| t.is_enabled())
        .unwrap_or_else(|| is_thinking_variant(model));

    let system_text =
        merge_system_instruction(request.system.as_ref().map(|s| s.as_text()));

    let contents =
        claude::convert_claude_messages(&request.messages, enable_thinking, model, session_id, caches);

    let params = normalize_claude_parameters(request);
    let generation_config = to_generation_config(&params, enable_thinking, model);

    let declarations = request
        .tools
        .as_deref()
        .map(|tools| build_function_declarations(tools, caches, session_id, model))
        .unwrap_or_default();

    let inner = build_inner_request(contents, system_text, generation_config, declarations)?;
    Ok(build_envelope(credential, model, inner))
}

/// Gemini generateContent (pass-through) → upstream envelope. Repair rather
/// than translation: assign missing call ids, fix thought/signature pairings.
pub fn generate_gemini_request_body(
    request: &GeminiRequest,
    model: &str,
    credential: &Credential,
    caches: &CacheRegistry,
) -> ProxyResult<Value> {
    if request.contents.is_empty() {
        return Err(ProxyError::Validation("contents is required".to_string()));
    }

    let session_id = credential.session_id.as_str();

    let mut contents = request.contents.clone();
    gemini::process_function_call_ids(&mut contents);
    gemini::process_model_thoughts(&mut contents, model);

    let params = normalize_gemini_parameters(request.generation_config.as_ref());
    let enable_thinking =
        params.include_thoughts.unwrap_or_else(|| is_thinking_variant(model));
    let generation_config = to_generation_config(&params, enable_thinking, model);

    let caller_system = request.system_instruction.as_ref().map(system_instruction_text);
    let system_text = merge_system_instruction(caller_system.filter(|s| !s.is_empty()));

    let declarations = request
        .tools
        .as_deref()
        .map(|tools| build_function_declarations(tools, caches, session_id, model))
        .unwrap_or_default();

    let inner = build_inner_request(contents, system_text, generation_config, declarations)?;
    Ok(build_envelope(credential, model, inner))
}

/// Extract plain text from a native systemInstruction value (string, single
/// part, or role+parts object).
fn system_instruction_text(value: &Value) -> String {
    if let Some(text) = value.as_str() {
        return text.to_string();
    }
    if let Some(parts) = value.get("parts").and_then(Value::as_array) {
        return parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
    }
    value.get("text").and_then(Value::as_str).unwrap_or_default().to_string()
}
