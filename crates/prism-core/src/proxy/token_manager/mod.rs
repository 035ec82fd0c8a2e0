//! Credential pool with pluggable rotation strategies.
//!
//! One `TokenManager` instance serves the whole process. Mutations are
//! synchronous in-memory updates guarded by one mutex; persistence is a
//! fire-and-forget merge back into the token file, so the in-memory pool is
//! always authoritative even while a disk write is pending or failed.

mod refresh;
mod store;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use prism_types::credential::Credential;

pub use store::TokenStore;

use crate::config;
use crate::error::{ProxyError, ProxyResult};

/// Which credential serves the next request, and when the cursor moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Advance after every handout: pure load distribution.
    #[default]
    RoundRobin,
    /// Advance after N requests on the same credential.
    RequestCount,
    /// Rotate only within the quota-available view; reset everything when it
    /// empties.
    QuotaExhausted,
}

struct RotationState {
    pool: Vec<Credential>,
    cursor: usize,
    /// Per-credential handout counter, keyed by refresh_token.
    request_counts: HashMap<String, u32>,
    /// Indices of quota-available credentials (quota_exhausted strategy).
    quota_view: Vec<usize>,
    quota_cursor: usize,
}

impl RotationState {
    fn new() -> Self {
        Self {
            pool: Vec::new(),
            cursor: 0,
            request_counts: HashMap::new(),
            quota_view: Vec::new(),
            quota_cursor: 0,
        }
    }

    fn rebuild_quota_view(&mut self) {
        self.quota_view = self
            .pool
            .iter()
            .enumerate()
            .filter(|(_, c)| c.has_quota)
            .map(|(i, _)| i)
            .collect();
        self.clamp_cursors();
    }

    /// The cursors must always index into the current lists.
    fn clamp_cursors(&mut self) {
        if self.pool.is_empty() {
            self.cursor = 0;
        } else {
            self.cursor %= self.pool.len();
        }
        if self.quota_view.is_empty() {
            self.quota_cursor = 0;
        } else {
            self.quota_cursor %= self.quota_view.len();
        }
    }

    fn position(&self, refresh_token: &str) -> Option<usize> {
        self.pool.iter().position(|c| c.refresh_token == refresh_token)
    }
}

/// Process-local conversation namespace for the signature/tool-name caches.
/// Regenerated on every load/reload, never persisted.
fn new_session_id() -> String {
    use rand::Rng;
    format!("-{}", rand::thread_rng().gen_range(100_000_000i64..=999_999_999_999))
}

enum PrepareError {
    /// Permanent auth failure: disable the credential and try the next one.
    Disable(ProxyError),
    /// Transient failure: skip this candidate for this call only.
    Skip(ProxyError),
}

pub struct TokenManager {
    store: Arc<TokenStore>,
    http: reqwest::Client,
    strategy: RotationStrategy,
    request_count_limit: u32,
    skip_project_verification: bool,
    state: tokio::sync::Mutex<RotationState>,
    init: tokio::sync::OnceCell<()>,
}

impl TokenManager {
    pub fn new(
        store: TokenStore,
        strategy: RotationStrategy,
        request_count_limit: u32,
        skip_project_verification: bool,
    ) -> Self {
        Self {
            store: Arc::new(store),
            http: reqwest::Client::new(),
            strategy,
            request_count_limit: request_count_limit.max(1),
            skip_project_verification,
            state: tokio::sync::Mutex::new(RotationState::new()),
            init: tokio::sync::OnceCell::new(),
        }
    }

    /// Build from the global gateway configuration.
    pub fn from_config() -> Self {
        let cfg = config::get_config();
        Self::new(
            TokenStore::new(cfg.token_file),
            cfg.rotation.strategy,
            cfg.rotation.request_count_limit,
            cfg.skip_project_verification,
        )
    }

    /// Memoized lazy initialization: concurrent first callers share one load.
    async fn ensure_initialized(self: &Arc<Self>) -> ProxyResult<()> {
        let manager = Arc::clone(self);
        self.init
            .get_or_try_init(|| async move {
                let expired = manager.load_pool().await?;
                // Fire-and-forget refresh per expired credential; one bad
                // credential must not block the others.
                for credential in expired {
                    let manager = Arc::clone(&manager);
                    tokio::spawn(async move {
                        if let Err(e) = manager.refresh_in_place(&credential).await {
                            tracing::warn!(
                                "[TokenManager] Startup refresh failed for …{}: {}",
                                credential.token_suffix(),
                                e
                            );
                        }
                    });
                }
                Ok::<(), ProxyError>(())
            })
            .await
            .map(|_| ())
    }

    /// Load enabled credentials from the store, returning the already-expired
    /// ones for background refresh.
    async fn load_pool(&self) -> ProxyResult<Vec<Credential>> {
        let loaded = self.store.read_all().await?;
        let mut pool: Vec<Credential> = loaded.into_iter().filter(|c| c.enable).collect();
        for credential in &mut pool {
            credential.session_id = new_session_id();
        }
        let expired: Vec<Credential> = pool.iter().filter(|c| c.is_expired()).cloned().collect();

        let mut state = self.state.lock().await;
        let count = pool.len();
        state.pool = pool;
        state.cursor = 0;
        state.quota_cursor = 0;
        state.request_counts.clear();
        state.rebuild_quota_view();
        drop(state);

        tracing::info!(
            "[TokenManager] Loaded {} credential(s), {} already expired",
            count,
            expired.len()
        );
        Ok(expired)
    }

    /// Re-read the token file and rebuild the pool (admin/file changes).
    pub async fn reload(self: &Arc<Self>) -> ProxyResult<usize> {
        self.ensure_initialized().await?;
        self.store.invalidate();
        let expired = self.load_pool().await?;
        for credential in expired {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let _ = manager.refresh_in_place(&credential).await;
            });
        }
        Ok(self.token_count().await)
    }

    pub async fn token_count(&self) -> usize {
        self.state.lock().await.pool.len()
    }

    /// Hand out the credential for the next request. `Ok(None)` means the
    /// pool is empty or every candidate failed preparation this call.
    pub async fn get_token(self: &Arc<Self>) -> ProxyResult<Option<Credential>> {
        self.ensure_initialized().await?;

        let mut attempted: HashSet<String> = HashSet::new();
        loop {
            let candidate = {
                let mut state = self.state.lock().await;
                self.select_candidate(&mut state, &attempted)
            };
            let Some(candidate) = candidate else {
                if !attempted.is_empty() {
                    tracing::warn!(
                        "[TokenManager] All {} candidate(s) failed preparation",
                        attempted.len()
                    );
                }
                return Ok(None);
            };

            match self.prepare_token(&candidate).await {
                Ok(ready) => {
                    self.note_success(&ready.refresh_token).await;
                    return Ok(Some(ready));
                },
                Err(PrepareError::Disable(e)) => {
                    tracing::warn!(
                        "[TokenManager] Disabling credential …{}: {}",
                        candidate.token_suffix(),
                        e
                    );
                    attempted.insert(candidate.refresh_token.clone());
                    self.disable_token(&candidate.refresh_token).await;
                },
                Err(PrepareError::Skip(e)) => {
                    tracing::warn!(
                        "[TokenManager] Skipping credential …{} for this call: {}",
                        candidate.token_suffix(),
                        e
                    );
                    attempted.insert(candidate.refresh_token.clone());
                },
            }
        }
    }

    fn select_candidate(
        &self,
        state: &mut RotationState,
        attempted: &HashSet<String>,
    ) -> Option<Credential> {
        let total = state.pool.len();
        if total == 0 {
            return None;
        }

        match self.strategy {
            RotationStrategy::RoundRobin | RotationStrategy::RequestCount => {
                let start = state.cursor.min(total - 1);
                (0..total)
                    .map(|offset| (start + offset) % total)
                    .map(|idx| &state.pool[idx])
                    .find(|c| !attempted.contains(&c.refresh_token))
                    .cloned()
            },
            RotationStrategy::QuotaExhausted => {
                if state.quota_view.is_empty() {
                    if state.pool.iter().all(|c| attempted.contains(&c.refresh_token)) {
                        return None;
                    }
                    // Quota windows are time-based; assume they rolled over
                    // and retry everything instead of surfacing an error.
                    tracing::warn!(
                        "[TokenManager] Every credential is quota-exhausted, resetting all flags"
                    );
                    for credential in &mut state.pool {
                        credential.has_quota = true;
                    }
                    state.rebuild_quota_view();
                    state.quota_cursor = 0;
                    self.persist_snapshot_later(state.pool.clone());
                }

                let view_len = state.quota_view.len();
                if view_len == 0 {
                    return None;
                }
                let start = state.quota_cursor.min(view_len - 1);
                (0..view_len)
                    .map(|offset| state.quota_view[(start + offset) % view_len])
                    .map(|idx| &state.pool[idx])
                    .find(|c| !attempted.contains(&c.refresh_token))
                    .cloned()
            },
        }
    }

    /// Advance rotation bookkeeping after a successful handout.
    async fn note_success(&self, refresh_token: &str) {
        let mut state = self.state.lock().await;
        let Some(idx) = state.position(refresh_token) else { return };
        let total = state.pool.len();

        match self.strategy {
            RotationStrategy::RoundRobin => {
                state.cursor = (idx + 1) % total;
            },
            RotationStrategy::RequestCount => {
                let count = state.request_counts.entry(refresh_token.to_string()).or_insert(0);
                *count += 1;
                let rotate = *count >= self.request_count_limit;
                if rotate {
                    *count = 0;
                }
                state.cursor = if rotate { (idx + 1) % total } else { idx };
            },
            RotationStrategy::QuotaExhausted => {
                if let Some(view_pos) = state.quota_view.iter().position(|&i| i == idx) {
                    let view_len = state.quota_view.len();
                    state.quota_cursor = (view_pos + 1) % view_len;
                }
            },
        }
    }

    /// Make a selected credential servable: refresh if expired, resolve the
    /// project binding.
    async fn prepare_token(&self, candidate: &Credential) -> Result<Credential, PrepareError> {
        let mut credential = candidate.clone();

        if credential.is_expired() {
            match refresh::refresh_access_token(&self.http, &credential).await {
                Ok(refreshed) => {
                    credential.apply_refresh(
                        refreshed.access_token,
                        refreshed.expires_in,
                        chrono::Utc::now().timestamp_millis(),
                    );
                    self.commit_credential(&credential).await;
                },
                Err(e) => {
                    let permanent = matches!(
                        &e,
                        ProxyError::Token { status, .. } if *status == 400 || *status == 403
                    );
                    return Err(if permanent {
                        PrepareError::Disable(e)
                    } else {
                        PrepareError::Skip(e)
                    });
                },
            }
        }

        if credential.project_id.as_deref().map_or(true, str::is_empty) {
            if self.skip_project_verification {
                credential.project_id = Some(refresh::random_project_id());
                self.commit_credential(&credential).await;
            } else {
                match refresh::fetch_project_id(&self.http, &credential.access_token).await {
                    Ok(Some(project_id)) => {
                        credential.project_id = Some(project_id);
                        self.commit_credential(&credential).await;
                    },
                    // Lookup succeeded but no project: the account is
                    // unqualified, not temporarily unavailable.
                    Ok(None) => {
                        return Err(PrepareError::Disable(ProxyError::Internal(
                            "account has no upstream project binding".to_string(),
                        )));
                    },
                    Err(e) => return Err(PrepareError::Skip(e)),
                }
            }
        }

        Ok(credential)
    }

    /// Refresh one credential and commit the result (startup/background path).
    async fn refresh_in_place(&self, credential: &Credential) -> ProxyResult<()> {
        let refreshed = refresh::refresh_access_token(&self.http, credential).await;
        match refreshed {
            Ok(r) => {
                let mut updated = credential.clone();
                updated.apply_refresh(
                    r.access_token,
                    r.expires_in,
                    chrono::Utc::now().timestamp_millis(),
                );
                self.commit_credential(&updated).await;
                Ok(())
            },
            Err(e) => {
                if matches!(&e, ProxyError::Token { status, .. } if *status == 400 || *status == 403)
                {
                    self.disable_token(&credential.refresh_token).await;
                }
                Err(e)
            },
        }
    }

    /// Write an updated credential back into the pool and schedule a persist.
    async fn commit_credential(&self, updated: &Credential) {
        let mut state = self.state.lock().await;
        if let Some(idx) = state.position(&updated.refresh_token) {
            let session_id = state.pool[idx].session_id.clone();
            state.pool[idx] = updated.clone();
            // The pool entry keeps its session namespace across refreshes.
            state.pool[idx].session_id = session_id;
        }
        let snapshot = state.pool.clone();
        drop(state);
        self.persist_snapshot_later(snapshot);
    }

    /// Permanent auth failure: flag `enable:false` on disk, drop from the
    /// in-memory pool, re-clamp cursors.
    pub async fn disable_token(&self, refresh_token: &str) {
        let snapshot = {
            let mut state = self.state.lock().await;
            let Some(idx) = state.position(refresh_token) else { return };
            state.pool[idx].enable = false;
            let snapshot = state.pool.clone();
            state.pool.remove(idx);
            state.request_counts.remove(refresh_token);
            state.rebuild_quota_view();
            snapshot
        };
        tracing::warn!("[TokenManager] Credential disabled ({} left in pool)", snapshot.len() - 1);
        self.persist_snapshot_later(snapshot);
    }

    /// Upstream signalled quota depletion for this credential's window.
    pub async fn mark_quota_exhausted(&self, refresh_token: &str) {
        let snapshot = {
            let mut state = self.state.lock().await;
            let Some(idx) = state.position(refresh_token) else { return };
            state.pool[idx].has_quota = false;

            if self.strategy == RotationStrategy::QuotaExhausted {
                if let Some(view_pos) = state.quota_view.iter().position(|&i| i == idx) {
                    state.quota_view.remove(view_pos);
                    // Advance past the removed slot.
                    if state.quota_view.is_empty() {
                        state.quota_cursor = 0;
                    } else {
                        state.quota_cursor = view_pos % state.quota_view.len();
                    }
                }
            }
            state.pool.clone()
        };
        tracing::info!("[TokenManager] Credential marked quota-exhausted");
        self.persist_snapshot_later(snapshot);
    }

    /// Availability over durability: callers never wait for the disk write,
    /// and a failed write only costs one extra refresh on next boot.
    fn persist_snapshot_later(&self, snapshot: Vec<Credential>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.merge_active(&snapshot).await {
                tracing::warn!("[TokenManager] Persist failed (in-memory state still authoritative): {}", e);
            }
        });
    }

    /// Test/introspection helper: clone of the current pool.
    pub async fn pool_snapshot(&self) -> Vec<Credential> {
        self.state.lock().await.pool.clone()
    }
}
