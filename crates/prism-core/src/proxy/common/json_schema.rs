//! JSON-Schema cleaning for upstream tool declarations.
//!
//! The upstream tool-schema dialect is a restricted subset of JSON Schema;
//! unsupported keys cause 400 INVALID_ARGUMENT. Cleaning rebuilds the schema
//! without the offending keys instead of mutating the caller's value.

use serde_json::Value;

/// Keys the upstream dialect rejects, including snake_case spellings some
/// clients emit.
const STRIPPED_KEYS: &[&str] = &[
    "$schema",
    "additionalProperties",
    "additional_properties",
    "minLength",
    "min_length",
    "maxLength",
    "max_length",
    "minItems",
    "min_items",
    "maxItems",
    "max_items",
    "anyOf",
    "any_of",
    "oneOf",
    "one_of",
    "allOf",
    "all_of",
    "multipleOf",
    "multiple_of",
];

/// Recursively strip unsupported JSON-Schema keys from a tool parameter
/// schema. The input is not mutated.
pub fn clean_parameters(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let cleaned = map
                .iter()
                .filter(|(key, _)| !STRIPPED_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), clean_parameters(value)))
                .collect();
            Value::Object(cleaned)
        },
        Value::Array(items) => Value::Array(items.iter().map(clean_parameters).collect()),
        other => other.clone(),
    }
}
