//! Per-protocol error envelopes.
//!
//! Each protocol has its own error shape and its own vocabulary for HTTP
//! statuses; the internal error taxonomy never leaks to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::error::ProxyError;

fn http_status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// `{"error": {"message", "type", "code"}}`.
pub fn openai_error_body(status: u16, message: &str) -> Value {
    let error_type = match status {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        _ => "api_error",
    };
    json!({
        "error": {
            "message": message,
            "type": error_type,
            "code": error_type,
        }
    })
}

pub fn openai_error(err: &ProxyError) -> Response {
    let status = err.status_code();
    (http_status(status), Json(openai_error_body(status, &err.client_message()))).into_response()
}

/// `{"type": "error", "error": {"type", "message"}}` with the fixed
/// status-to-type table.
pub fn claude_error_body(status: u16, message: &str) -> Value {
    let error_type = match status {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        413 => "request_too_large",
        429 => "rate_limit_error",
        529 => "overloaded_error",
        _ => "api_error",
    };
    json!({
        "type": "error",
        "error": {
            "type": error_type,
            "message": message,
        }
    })
}

pub fn claude_error(err: &ProxyError) -> Response {
    let status = err.status_code();
    (http_status(status), Json(claude_error_body(status, &err.client_message()))).into_response()
}

/// `{"error": {"code", "message", "status"}}` with the HTTP-code-to-enum
/// table.
pub fn gemini_error_body(status: u16, message: &str) -> Value {
    let status_enum = match status {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        500 => "INTERNAL",
        503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        _ => "UNKNOWN",
    };
    json!({
        "error": {
            "code": status,
            "message": message,
            "status": status_enum,
        }
    })
}

pub fn gemini_error(err: &ProxyError) -> Response {
    let status = err.status_code();
    (http_status(status), Json(gemini_error_body(status, &err.client_message()))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_table_maps_known_statuses() {
        assert_eq!(claude_error_body(400, "m")["error"]["type"], json!("invalid_request_error"));
        assert_eq!(claude_error_body(429, "m")["error"]["type"], json!("rate_limit_error"));
        assert_eq!(claude_error_body(529, "m")["error"]["type"], json!("overloaded_error"));
        assert_eq!(claude_error_body(502, "m")["error"]["type"], json!("api_error"));
    }

    #[test]
    fn gemini_table_maps_known_statuses() {
        assert_eq!(gemini_error_body(429, "m")["error"]["status"], json!("RESOURCE_EXHAUSTED"));
        assert_eq!(gemini_error_body(403, "m")["error"]["status"], json!("PERMISSION_DENIED"));
        assert_eq!(gemini_error_body(418, "m")["error"]["status"], json!("UNKNOWN"));
    }

    #[test]
    fn internal_taxonomy_names_never_leak() {
        let err = ProxyError::NoTokenAvailable;
        for body in [
            openai_error_body(err.status_code(), &err.client_message()),
            claude_error_body(err.status_code(), &err.client_message()),
            gemini_error_body(err.status_code(), &err.client_message()),
        ] {
            let raw = body.to_string();
            assert!(!raw.contains("NoTokenAvailable"));
            assert!(!raw.contains("ProxyError"));
        }
    }
}
