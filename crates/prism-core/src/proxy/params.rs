//! Generation parameter normalization.
//!
//! Each client protocol spells temperature/top-p/max-tokens and its thinking
//! controls differently; everything is mapped into [`NormalizedParameters`]
//! first and projected into the upstream generation config from there.

use serde_json::{json, Value};

use prism_types::protocol::claude::ClaudeRequest;
use prism_types::protocol::openai::OpenAiRequest;

use crate::config;
use crate::proxy::common::model_family::ModelFamily;

/// Fixed budgets for the OpenAI `reasoning_effort` vocabulary.
const EFFORT_BUDGET_LOW: i64 = 1024;
const EFFORT_BUDGET_MEDIUM: i64 = 16000;
const EFFORT_BUDGET_HIGH: i64 = 32000;

/// Protocol-independent generation parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedParameters {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    /// Numeric thinking budget. `None` means "use the configured default".
    pub thinking_budget: Option<i64>,
    /// Discrete thinking level (Gemini 3 vocabulary), overrides the budget.
    pub thinking_level: Option<String>,
    /// Explicit includeThoughts from pass-through callers.
    pub include_thoughts: Option<bool>,
}

pub fn normalize_openai_parameters(request: &OpenAiRequest) -> NormalizedParameters {
    let thinking_budget = request.reasoning_effort.as_deref().map(|effort| {
        match effort.to_lowercase().as_str() {
            "low" => EFFORT_BUDGET_LOW,
            "medium" => EFFORT_BUDGET_MEDIUM,
            "high" => EFFORT_BUDGET_HIGH,
            other => {
                tracing::debug!("[Params] Unknown reasoning_effort '{}', using low budget", other);
                EFFORT_BUDGET_LOW
            },
        }
    });

    NormalizedParameters {
        max_tokens: request.max_completion_tokens.or(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        thinking_budget,
        thinking_level: None,
        include_thoughts: None,
    }
}

pub fn normalize_claude_parameters(request: &ClaudeRequest) -> NormalizedParameters {
    let (thinking_budget, include_thoughts) = match &request.thinking {
        Some(thinking) if thinking.is_enabled() => (thinking.budget_tokens, Some(true)),
        Some(_) => (Some(0), Some(false)),
        None => (None, None),
    };

    NormalizedParameters {
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        thinking_budget,
        thinking_level: None,
        include_thoughts,
    }
}

/// Pass-through: the caller already speaks `generationConfig`.
pub fn normalize_gemini_parameters(generation_config: Option<&Value>) -> NormalizedParameters {
    let Some(config) = generation_config else {
        return NormalizedParameters::default();
    };

    let thinking = config.get("thinkingConfig");
    // `thinkingBudget: -1` is the wire encoding for "use the default"; it must
    // normalize to unset, never be forwarded as a negative budget.
    let thinking_budget = thinking
        .and_then(|t| t.get("thinkingBudget"))
        .and_then(Value::as_i64)
        .filter(|budget| *budget >= 0);

    NormalizedParameters {
        max_tokens: config
            .get("maxOutputTokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        temperature: config.get("temperature").and_then(Value::as_f64),
        top_p: config.get("topP").and_then(Value::as_f64),
        top_k: config.get("topK").and_then(Value::as_u64).map(|v| v as u32),
        thinking_budget,
        thinking_level: thinking
            .and_then(|t| t.get("thinkingLevel"))
            .and_then(Value::as_str)
            .map(str::to_string),
        include_thoughts: thinking.and_then(|t| t.get("includeThoughts")).and_then(Value::as_bool),
    }
}

/// Project normalized parameters into the upstream generation config.
///
/// A thinking budget of exactly 0 downgrades thinking even when the caller
/// requested a thinking-capable model. Claude models must not carry `topP`
/// while thinking is enabled; the key is deleted rather than skipped because
/// earlier steps may already have set it.
pub fn to_generation_config(
    params: &NormalizedParameters,
    enable_thinking: bool,
    model: &str,
) -> Value {
    let defaults = config::get_config().defaults;
    let family = ModelFamily::from_model_name(model);

    let mut generation_config = json!({
        "maxOutputTokens": params.max_tokens.unwrap_or(defaults.max_tokens),
        "temperature": params.temperature.unwrap_or(defaults.temperature),
        "topP": params.top_p.unwrap_or(defaults.top_p),
        "topK": params.top_k.unwrap_or(defaults.top_k),
    });

    let mut thinking_on = enable_thinking;
    let effective_budget = params.thinking_budget.unwrap_or(defaults.thinking_budget);
    if thinking_on && effective_budget == 0 {
        tracing::debug!("[Params] Thinking budget 0 for {}, disabling thinking", model);
        thinking_on = false;
    }

    if thinking_on {
        if family.uses_thinking_level() {
            let level = params
                .thinking_level
                .clone()
                .unwrap_or_else(|| thinking_level_from_budget(effective_budget));
            generation_config["thinkingConfig"] = json!({
                "includeThoughts": true,
                "thinkingLevel": level,
            });
        } else {
            generation_config["thinkingConfig"] = json!({
                "includeThoughts": true,
                "thinkingBudget": effective_budget,
            });
        }
    }

    if family.is_claude() && thinking_on {
        if let Some(obj) = generation_config.as_object_mut() {
            obj.remove("topP");
        }
    }

    generation_config
}

/// Gemini 3 takes a discrete level; bucket numeric budgets from the other
/// protocols onto it.
fn thinking_level_from_budget(budget: i64) -> String {
    if budget <= EFFORT_BUDGET_LOW {
        "low".to_string()
    } else {
        "high".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai_request(json_body: Value) -> OpenAiRequest {
        serde_json::from_value(json_body).unwrap()
    }

    fn claude_request(json_body: Value) -> ClaudeRequest {
        serde_json::from_value(json_body).unwrap()
    }

    #[test]
    fn openai_effort_maps_to_fixed_budgets() {
        for (effort, budget) in [("low", 1024), ("medium", 16000), ("high", 32000)] {
            let req = openai_request(json!({"model": "m", "reasoning_effort": effort}));
            assert_eq!(normalize_openai_parameters(&req).thinking_budget, Some(budget));
        }
    }

    #[test]
    fn openai_max_completion_tokens_wins() {
        let req = openai_request(json!({
            "model": "m", "max_tokens": 100, "max_completion_tokens": 200
        }));
        assert_eq!(normalize_openai_parameters(&req).max_tokens, Some(200));
    }

    #[test]
    fn claude_thinking_disabled_normalizes_to_zero_budget() {
        let req = claude_request(json!({
            "model": "claude-sonnet-4-5",
            "thinking": {"type": "disabled"}
        }));
        let params = normalize_claude_parameters(&req);
        assert_eq!(params.thinking_budget, Some(0));
        assert_eq!(params.include_thoughts, Some(false));
    }

    #[test]
    fn claude_enabled_thinking_carries_budget() {
        let req = claude_request(json!({
            "model": "claude-sonnet-4-5-thinking",
            "thinking": {"type": "enabled", "budget_tokens": 2048}
        }));
        let params = normalize_claude_parameters(&req);
        assert_eq!(params.thinking_budget, Some(2048));
        assert_eq!(params.include_thoughts, Some(true));
    }

    #[test]
    fn gemini_negative_budget_normalizes_to_unset() {
        let config = json!({"thinkingConfig": {"thinkingBudget": -1, "includeThoughts": true}});
        let params = normalize_gemini_parameters(Some(&config));
        assert_eq!(params.thinking_budget, None);
        assert_eq!(params.include_thoughts, Some(true));
    }

    #[test]
    fn zero_budget_downgrades_thinking() {
        let _guard = crate::config::CONFIG_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        crate::config::update_config(crate::config::GatewayConfig::default());
        let params = NormalizedParameters { thinking_budget: Some(0), ..Default::default() };
        let config = to_generation_config(&params, true, "claude-sonnet-4-5-thinking");
        assert!(config.get("thinkingConfig").is_none());
        // Thinking got disabled, so topP survives even on Claude.
        assert!(config.get("topP").is_some());
    }

    #[test]
    fn claude_thinking_deletes_top_p() {
        let _guard = crate::config::CONFIG_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        crate::config::update_config(crate::config::GatewayConfig::default());
        let params = NormalizedParameters { top_p: Some(0.9), ..Default::default() };
        let config = to_generation_config(&params, true, "claude-sonnet-4-5-thinking");
        assert!(config.get("topP").is_none());
        assert_eq!(config["thinkingConfig"]["thinkingBudget"], json!(1024));
    }

    #[test]
    fn gemini3_gets_thinking_level_not_budget() {
        let _guard = crate::config::CONFIG_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        crate::config::update_config(crate::config::GatewayConfig::default());
        let params = NormalizedParameters { thinking_budget: Some(32000), ..Default::default() };
        let config = to_generation_config(&params, true, "gemini-3-pro");
        let thinking = &config["thinkingConfig"];
        assert_eq!(thinking["thinkingLevel"], json!("high"));
        assert!(thinking.get("thinkingBudget").is_none());
        // Non-Claude model keeps topP.
        assert!(config.get("topP").is_some());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let _guard = crate::config::CONFIG_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        crate::config::update_config(crate::config::GatewayConfig::default());
        let config = to_generation_config(&NormalizedParameters::default(), false, "gemini-2.5-flash");
        assert_eq!(config["maxOutputTokens"], json!(65535));
        assert_eq!(config["topK"], json!(64));
        assert!(config.get("thinkingConfig").is_none());
    }
}
