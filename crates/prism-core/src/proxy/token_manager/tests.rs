//! Rotation behavior tests. Credentials are fresh (non-expired) with a
//! project binding so no network path is exercised.

use super::*;
use prism_types::credential::Credential;

fn fresh_credential(tag: &str) -> Credential {
    let mut credential = Credential::new(
        format!("access-{tag}"),
        format!("refresh-{tag}"),
        3600,
        chrono::Utc::now().timestamp_millis(),
    );
    credential.project_id = Some(format!("project-{tag}"));
    credential.email = Some(format!("{tag}@example.com"));
    credential
}

async fn manager_with(
    credentials: &[Credential],
    strategy: RotationStrategy,
    request_count_limit: u32,
) -> (Arc<TokenManager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path().join("tokens.json"));
    store.write_all(credentials).await.unwrap();
    let manager = Arc::new(TokenManager::new(store, strategy, request_count_limit, true));
    (manager, dir)
}

#[tokio::test]
async fn empty_pool_returns_none() {
    let (manager, _dir) = manager_with(&[], RotationStrategy::RoundRobin, 1).await;
    assert!(manager.get_token().await.unwrap().is_none());
}

#[tokio::test]
async fn round_robin_is_fair_over_n_calls() {
    let credentials =
        [fresh_credential("a"), fresh_credential("b"), fresh_credential("c")];
    let (manager, _dir) = manager_with(&credentials, RotationStrategy::RoundRobin, 1).await;

    let mut served = Vec::new();
    for _ in 0..3 {
        let token = manager.get_token().await.unwrap().unwrap();
        served.push(token.refresh_token);
    }
    assert_eq!(served, vec!["refresh-a", "refresh-b", "refresh-c"]);

    // Cursor wrapped: the fourth call starts the sequence over.
    let token = manager.get_token().await.unwrap().unwrap();
    assert_eq!(token.refresh_token, "refresh-a");
}

#[tokio::test]
async fn request_count_pins_credential_for_n_requests() {
    let credentials = [fresh_credential("a"), fresh_credential("b")];
    let (manager, _dir) = manager_with(&credentials, RotationStrategy::RequestCount, 2).await;

    let mut served = Vec::new();
    for _ in 0..5 {
        served.push(manager.get_token().await.unwrap().unwrap().refresh_token);
    }
    assert_eq!(
        served,
        vec!["refresh-a", "refresh-a", "refresh-b", "refresh-b", "refresh-a"]
    );
}

#[tokio::test]
async fn quota_exhaustion_self_heals_when_view_empties() {
    let credentials = [fresh_credential("a"), fresh_credential("b")];
    let (manager, _dir) = manager_with(&credentials, RotationStrategy::QuotaExhausted, 1).await;

    // Initialize the pool, then exhaust both credentials.
    let first = manager.get_token().await.unwrap().unwrap();
    assert!(first.has_quota);
    manager.mark_quota_exhausted("refresh-a").await;
    manager.mark_quota_exhausted("refresh-b").await;

    // The filtered view is empty: the next call resets every flag and still
    // serves a credential.
    let token = manager.get_token().await.unwrap();
    assert!(token.is_some());
    let pool = manager.pool_snapshot().await;
    assert!(pool.iter().all(|c| c.has_quota));
}

#[tokio::test]
async fn quota_strategy_skips_exhausted_credentials() {
    let credentials = [fresh_credential("a"), fresh_credential("b")];
    let (manager, _dir) = manager_with(&credentials, RotationStrategy::QuotaExhausted, 1).await;

    let _ = manager.get_token().await.unwrap();
    manager.mark_quota_exhausted("refresh-a").await;

    for _ in 0..3 {
        let token = manager.get_token().await.unwrap().unwrap();
        assert_eq!(token.refresh_token, "refresh-b");
    }
}

#[tokio::test]
async fn disable_removes_from_pool_and_clamps_cursor() {
    let credentials = [fresh_credential("a"), fresh_credential("b")];
    let (manager, _dir) = manager_with(&credentials, RotationStrategy::RoundRobin, 1).await;

    // Move the cursor onto "b".
    let _ = manager.get_token().await.unwrap();
    manager.disable_token("refresh-b").await;

    assert_eq!(manager.token_count().await, 1);
    let token = manager.get_token().await.unwrap().unwrap();
    assert_eq!(token.refresh_token, "refresh-a");
}

#[tokio::test]
async fn disabled_credentials_are_not_loaded() {
    let mut disabled = fresh_credential("dead");
    disabled.enable = false;
    let credentials = [disabled, fresh_credential("live")];
    let (manager, _dir) = manager_with(&credentials, RotationStrategy::RoundRobin, 1).await;

    let token = manager.get_token().await.unwrap().unwrap();
    assert_eq!(token.refresh_token, "refresh-live");
    assert_eq!(manager.token_count().await, 1);
}

#[tokio::test]
async fn session_ids_are_assigned_at_load_and_negative() {
    let credentials = [fresh_credential("a")];
    let (manager, _dir) = manager_with(&credentials, RotationStrategy::RoundRobin, 1).await;

    let token = manager.get_token().await.unwrap().unwrap();
    assert!(token.session_id.starts_with('-'));
    assert!(token.session_id[1..].chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn reload_regenerates_session_ids() {
    let credentials = [fresh_credential("a")];
    let (manager, _dir) = manager_with(&credentials, RotationStrategy::RoundRobin, 1).await;

    let before = manager.get_token().await.unwrap().unwrap().session_id;
    manager.reload().await.unwrap();
    let after = manager.get_token().await.unwrap().unwrap().session_id;
    // Statistically distinct; equality would mean the ids were persisted.
    assert_ne!(before, after);
}
