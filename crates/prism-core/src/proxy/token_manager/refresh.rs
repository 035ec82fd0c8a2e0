//! OAuth token refresh and project-id discovery against the upstream.

use serde::Deserialize;
use serde_json::json;

use prism_types::credential::Credential;

use crate::error::{ProxyError, ProxyResult};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const LOAD_CODE_ASSIST_URL: &str = "https://cloudcode-pa.googleapis.com/v1internal:loadCodeAssist";

const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";

#[derive(Debug, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: i64,
}

/// Exchange a refresh token for a fresh access token.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    credential: &Credential,
) -> ProxyResult<RefreshedToken> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", credential.refresh_token.as_str()),
        ("client_id", CLIENT_ID),
        ("client_secret", CLIENT_SECRET),
    ];

    let response = client.post(TOKEN_URL).form(&form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProxyError::Token {
            status: status.as_u16(),
            token_suffix: credential.token_suffix().to_string(),
            message: body,
        });
    }

    let refreshed: RefreshedToken = response.json().await?;
    tracing::debug!(
        "[TokenRefresh] Refreshed …{} (expires_in={}s)",
        credential.token_suffix(),
        refreshed.expires_in
    );
    Ok(refreshed)
}

/// Resolve the upstream project binding via loadCodeAssist.
///
/// `Ok(None)` means the call succeeded but the account has no project: the
/// account is unqualified and the caller must disable it rather than retry.
pub async fn fetch_project_id(
    client: &reqwest::Client,
    access_token: &str,
) -> ProxyResult<Option<String>> {
    let body = json!({"metadata": {"ideType": "IDE_UNSPECIFIED"}});

    let response = client
        .post(LOAD_CODE_ASSIST_URL)
        .bearer_auth(access_token)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ProxyError::UpstreamApi {
            status: status.as_u16(),
            body: text,
            retry_after: None,
        });
    }

    let data: serde_json::Value = response.json().await?;
    Ok(data
        .get("cloudaicompanionProject")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

/// Synthetic project id for deployments that skip verification.
pub fn random_project_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    format!(
        "synthetic-{}-{}",
        rng.gen_range(100000..999999),
        rng.gen_range(0..0xffffu32)
    )
}
