//! Unified error types for the gateway core.

use thiserror::Error;

/// Main error type for all gateway operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Non-2xx from the upstream generation API.
    #[error("Upstream API error: HTTP {status}")]
    UpstreamApi {
        status: u16,
        body: String,
        /// Human-readable retry hint extracted from headers/body, if any.
        retry_after: Option<String>,
    },

    /// Credential refresh or exchange failure.
    #[error("Token error (…{token_suffix}): HTTP {status}: {message}")]
    Token {
        status: u16,
        /// Redacted refresh-token tail for log correlation.
        token_suffix: String,
        message: String,
    },

    /// Malformed client request.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The pool has no usable credential.
    #[error("No credential available to serve the request")]
    NoTokenAvailable,

    /// Network request failed (HTTP client).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File system I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unclassified error with message.
    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status this error should surface as when rendered to a client.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::UpstreamApi { status, .. } => *status,
            ProxyError::Token { .. } => 401,
            ProxyError::Validation(_) => 400,
            ProxyError::NoTokenAvailable => 401,
            ProxyError::Network(_) => 502,
            ProxyError::Json(_) | ProxyError::Io(_) | ProxyError::Internal(_) => 500,
        }
    }

    /// Message safe to render into a client-facing error envelope.
    pub fn client_message(&self) -> String {
        match self {
            ProxyError::UpstreamApi { status, body, retry_after } => {
                let mut msg = format!("Upstream returned HTTP {status}: {body}");
                if let Some(hint) = retry_after {
                    msg.push_str(&format!(" (retry after {hint})"));
                }
                msg
            },
            other => other.to_string(),
        }
    }
}

/// Result type alias for gateway operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<String> for ProxyError {
    fn from(s: String) -> Self {
        ProxyError::Internal(s)
    }
}

impl From<&str> for ProxyError {
    fn from(s: &str) -> Self {
        ProxyError::Internal(s.to_string())
    }
}
