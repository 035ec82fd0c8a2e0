//! Model family classification for type-safe model dispatch.

/// Hardcoded continuation signatures used when neither the client message nor
/// the session cache provides one. Upstream rejects thinking/tool
/// continuations with an empty signature, so a structurally valid opaque
/// value must always be attached. These are replayable generic signatures,
/// not secrets.
const CLAUDE_FALLBACK_THOUGHT_SIGNATURE: &str =
    "EqsDCkYIBRgCKkDhq5dvyB0mNwWrXNyEn0PaltgHZCVcAR0Bm0fJktF2ozdwIEnpBV5aVNUtlJfJsQsG0hJQ8Q3ZKXW2HnqtS8vgEgzLwW1cV0bUqLx6AcaGgzJr7fMVPSH9NnbTZXa3qvS5IjBN";
const GEMINI_FALLBACK_THOUGHT_SIGNATURE: &str =
    "CtoFAVSoXO7LmTEmFqrtoL1kAYDWnPZaQW5fMRPVAr2dXkQJfXm5Dk0sIhtE9zqR4cWyJ0uvB3pQnO6f1mHhgGLrCZ8kSxVd2wYt7NeUj5aD9oKqTbiM4rLXPCwFzgE1nJsB";
const FALLBACK_TOOL_SIGNATURE: &str =
    "EpwCCkYIBRgCKkDFs9hNzUPtrQ0XEdWyJmKc3vBgL6OqA81fTnxiR2oPYwV7ShbGe4Dz5lCuHM9kNaJ0IjApFqXtW3vmRdSgbyB1UzceLko8hTPwDnECGgwxYfM2uK5V0iqHxN4iMCrATJ7p";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Claude,
    /// Gemini 3 generation: discrete thinking level instead of token budget.
    Gemini3,
    Gemini,
}

impl ModelFamily {
    pub fn from_model_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("claude") {
            Self::Claude
        } else if lower.starts_with("gemini-3") {
            Self::Gemini3
        } else {
            Self::Gemini
        }
    }

    #[inline]
    pub fn is_claude(self) -> bool {
        matches!(self, Self::Claude)
    }

    /// Families that take `thinkingLevel` instead of a numeric budget.
    #[inline]
    pub fn uses_thinking_level(self) -> bool {
        matches!(self, Self::Gemini3)
    }

    /// Generic thought signature for synthesized thinking parts.
    pub fn fallback_thought_signature(self) -> &'static str {
        match self {
            Self::Claude => CLAUDE_FALLBACK_THOUGHT_SIGNATURE,
            Self::Gemini3 | Self::Gemini => GEMINI_FALLBACK_THOUGHT_SIGNATURE,
        }
    }

    /// Generic signature for synthesized function-call parts.
    pub fn fallback_tool_signature(self) -> &'static str {
        FALLBACK_TOOL_SIGNATURE
    }
}

/// Thinking-capable model variants are requested with a `-thinking` suffix
/// (e.g. `claude-sonnet-4-5-thinking`, `gemini-2.5-flash-thinking`).
pub fn is_thinking_variant(model: &str) -> bool {
    model.to_lowercase().contains("-thinking")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_families() {
        assert_eq!(ModelFamily::from_model_name("claude-sonnet-4-5-thinking"), ModelFamily::Claude);
        assert_eq!(ModelFamily::from_model_name("gemini-3-pro"), ModelFamily::Gemini3);
        assert_eq!(ModelFamily::from_model_name("gemini-2.5-flash"), ModelFamily::Gemini);
        assert_eq!(ModelFamily::from_model_name("GEMINI-3-FLASH"), ModelFamily::Gemini3);
    }

    #[test]
    fn thinking_variant_detection() {
        assert!(is_thinking_variant("claude-sonnet-4-5-thinking"));
        assert!(is_thinking_variant("gemini-2.5-flash-THINKING"));
        assert!(!is_thinking_variant("gemini-3-pro"));
    }

    #[test]
    fn fallback_signatures_are_non_empty() {
        for family in [ModelFamily::Claude, ModelFamily::Gemini3, ModelFamily::Gemini] {
            assert!(!family.fallback_thought_signature().is_empty());
            assert!(!family.fallback_tool_signature().is_empty());
        }
    }
}
