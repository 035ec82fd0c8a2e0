//! Upstream OAuth credential as persisted in the token file.

use serde::{Deserialize, Serialize};

/// Refresh headroom: a credential is treated as expired five minutes before
/// its actual expiry so in-flight requests never race the deadline.
pub const REFRESH_BUFFER_MS: i64 = 5 * 60 * 1000;

fn default_true() -> bool {
    true
}

/// One upstream credential. `refresh_token` is the stable identity key; every
/// lookup and on-disk merge matches on it and it is never mutated.
///
/// `session_id` is process-local: it namespaces the signature and tool-name
/// caches for the lifetime of this pool load and is regenerated on every
/// load/reload. It must never be written back to the token file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    /// Issued-at, milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(rename = "projectId", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "hasQuota", default = "default_true")]
    pub has_quota: bool,
    #[serde(skip)]
    pub session_id: String,
}

impl Credential {
    pub fn new(access_token: String, refresh_token: String, expires_in: i64, timestamp: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in,
            timestamp,
            enable: true,
            project_id: None,
            email: None,
            has_quota: true,
            session_id: String::new(),
        }
    }

    /// Expiry check against an explicit clock, lazily evaluated by callers.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.timestamp + self.expires_in * 1000 - REFRESH_BUFFER_MS
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp_millis())
    }

    /// Redacted identity for log lines: the refresh token tail, never the
    /// full secret.
    pub fn token_suffix(&self) -> &str {
        let len = self.refresh_token.len();
        &self.refresh_token[len.saturating_sub(8)..]
    }

    /// Apply a successful refresh in place. Identity (`refresh_token`) is
    /// untouched.
    pub fn apply_refresh(&mut self, access_token: String, expires_in: i64, now_ms: i64) {
        self.access_token = access_token;
        self.expires_in = expires_in;
        self.timestamp = now_ms;
    }
}
