//! Tool-name sanitization and restoration.
//!
//! Upstream only accepts identifier-safe function names. Client names (MCP
//! tools especially) routinely contain dots, slashes and unicode; the
//! sanitized form goes upstream and the original↔sanitized mapping is kept in
//! the [`ToolNameCache`] so results can be echoed back under the client's own
//! name.

use crate::proxy::caches::CacheRegistry;

const MAX_TOOL_NAME_LEN: usize = 128;

/// Strip a tool name down to `[A-Za-z0-9_-]`, trim leading/trailing
/// underscores, cap at 128 chars. An empty result falls back to `"tool"`.
pub fn sanitize_tool_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let trimmed = cleaned.trim_matches('_');
    let capped = if trimmed.len() > MAX_TOOL_NAME_LEN {
        // ASCII-only at this point, byte slicing is char-safe.
        &trimmed[..MAX_TOOL_NAME_LEN]
    } else {
        trimmed
    };
    if capped.is_empty() {
        "tool".to_string()
    } else {
        capped.to_string()
    }
}

/// Sanitize and record the mapping for later restoration.
pub fn register_tool_name(
    caches: &CacheRegistry,
    session_id: &str,
    model: &str,
    original: &str,
) -> String {
    let sanitized = sanitize_tool_name(original);
    caches.tool_names.record(session_id, model, &sanitized, original);
    sanitized
}

/// Restore the client's original tool name; a cache miss passes the sanitized
/// name through unchanged (the client sent an already-safe name, or the entry
/// aged out and the safe name is the best we have).
pub fn restore_tool_name(
    caches: &CacheRegistry,
    session_id: &str,
    model: &str,
    sanitized: &str,
) -> String {
    caches
        .tool_names
        .original_name(session_id, model, sanitized)
        .unwrap_or_else(|| sanitized.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_to_safe_charset() {
        assert_eq!(sanitize_tool_name("mcp.server/read_file"), "mcpserverread_file");
        assert_eq!(sanitize_tool_name("__weather__"), "weather");
        assert_eq!(sanitize_tool_name("get-time"), "get-time");
        assert_eq!(sanitize_tool_name("日本語"), "tool");
        assert_eq!(sanitize_tool_name(""), "tool");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(300);
        let out = sanitize_tool_name(&long);
        assert_eq!(out.len(), 128);
    }

    #[test]
    fn sanitized_output_always_matches_charset() {
        for name in ["a b c", "x.y.z", "ütf-8", "--flag--", "_"] {
            let out = sanitize_tool_name(name);
            assert!(!out.is_empty());
            assert!(out.len() <= 128);
            assert!(out.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        }
    }

    #[test]
    fn round_trip_through_cache() {
        let caches = CacheRegistry::new();
        let original = "mcp.search/web:query";
        let sanitized = register_tool_name(&caches, "-7", "gemini-3-pro", original);
        assert_eq!(restore_tool_name(&caches, "-7", "gemini-3-pro", &sanitized), original);
        // Different session does not see the mapping.
        assert_eq!(restore_tool_name(&caches, "-8", "gemini-3-pro", &sanitized), sanitized);
    }
}
