//! Upstream HTTP client: generation calls, bounded 429 retry with pacing,
//! retry-after extraction from the several shapes the upstream uses.

use serde_json::Value;
use std::time::Duration;

use crate::config;
use crate::error::{ProxyError, ProxyResult};

const UPSTREAM_BASE_URL: &str = "https://cloudcode-pa.googleapis.com/v1internal";

fn resolve_base_url() -> String {
    match std::env::var("PRISM_UPSTREAM_URL") {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().trim_end_matches('/').to_string(),
        _ => UPSTREAM_BASE_URL.to_string(),
    }
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new(), base_url: resolve_base_url() }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    /// Call the generation endpoint. 429 is retried up to the configured
    /// count, sleeping for the extracted retry-after hint (capped); every
    /// other non-2xx propagates immediately.
    pub async fn generate(
        &self,
        body: &Value,
        access_token: &str,
        stream: bool,
    ) -> ProxyResult<reqwest::Response> {
        let action = if stream { "streamGenerateContent?alt=sse" } else { "generateContent" };
        let url = format!("{}:{}", self.base_url, action);

        let cfg = config::get_config();
        let max_wait = Duration::from_millis(cfg.retry_max_wait_ms);
        let mut attempt: u32 = 0;

        loop {
            let response = self
                .http
                .post(&url)
                .bearer_auth(access_token)
                .json(body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let status_code = status.as_u16();
            let header_hint = response
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string);
            let body_text = response.text().await.unwrap_or_else(|_| format!("HTTP {status_code}"));
            let hint = extract_retry_after(header_hint.as_deref(), &body_text);

            if status_code == 429 && attempt < cfg.retry_429_max {
                attempt += 1;
                tracing::warn!(
                    "[Upstream] 429, retry {}/{} (hint: {:?})",
                    attempt,
                    cfg.retry_429_max,
                    hint
                );
                if let Some(delay) = hint {
                    tokio::time::sleep(delay.min(max_wait)).await;
                }
                continue;
            }

            return Err(ProxyError::UpstreamApi {
                status: status_code,
                body: body_text,
                retry_after: hint.map(format_retry_hint),
            });
        }
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A 403 whose body carries a context-length marker is a request problem, not
/// a credential problem; the credential must not be disabled for it.
pub fn is_context_length_error(body: &str) -> bool {
    body.contains("input context is too long")
        || body.contains("exceeds the maximum number of tokens")
}

/// Retry-after duration from, in priority order: the `Retry-After` header,
/// a structured RetryInfo detail (`"retryDelay": "30s"`), or an absolute
/// reset timestamp in the error body.
pub fn extract_retry_after(header: Option<&str>, body: &str) -> Option<Duration> {
    if let Some(seconds) = header.and_then(|h| h.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(seconds));
    }

    let parsed: Value = serde_json::from_str(body).ok()?;

    if let Some(details) = parsed
        .pointer("/error/details")
        .and_then(Value::as_array)
    {
        for detail in details {
            let is_retry_info = detail
                .get("@type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.ends_with("RetryInfo"));
            if !is_retry_info {
                continue;
            }
            if let Some(delay) = detail.get("retryDelay").and_then(Value::as_str) {
                if let Some(duration) = parse_duration_literal(delay) {
                    return Some(duration);
                }
            }
        }
    }

    if let Some(reset) = find_reset_timestamp(&parsed) {
        let now = chrono::Utc::now();
        let delta = reset.signed_duration_since(now);
        if delta > chrono::Duration::zero() {
            return delta.to_std().ok();
        }
    }

    None
}

/// `"30s"`, `"1.5s"`, `"90s"`.
fn parse_duration_literal(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim().strip_suffix('s')?;
    let seconds: f64 = trimmed.parse().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

/// Scan the error body for an absolute quota-reset timestamp.
fn find_reset_timestamp(value: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if key.to_lowercase().contains("reset") {
                    if let Some(raw) = v.as_str() {
                        if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
                            return Some(parsed.with_timezone(&chrono::Utc));
                        }
                    }
                }
                if let Some(found) = find_reset_timestamp(v) {
                    return Some(found);
                }
            }
            None
        },
        Value::Array(items) => items.iter().find_map(find_reset_timestamp),
        _ => None,
    }
}

/// Human-readable suffix for error messages.
pub fn format_retry_hint(duration: Duration) -> String {
    let total = duration.as_secs();
    if total >= 60 {
        format!("{}m{}s", total / 60, total % 60)
    } else {
        format!("{}s", total.max(1))
    }
}
