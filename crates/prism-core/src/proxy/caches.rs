//! Shared TTL caches: continuation signatures, tool-name reverse mappings,
//! and the model-list response.
//!
//! All caches are instance-constructible so tests get isolated state; the
//! server binary uses the process-wide [`CacheRegistry::global`] instance.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

/// Entries older than this are treated as absent.
const ENTRY_TTL: Duration = Duration::from_secs(30 * 60);

/// Per-map size cap; oldest entries are evicted first under pressure.
const CACHE_LIMIT: usize = 256;

/// Model-list responses are memoized briefly.
const MODEL_LIST_TTL: Duration = Duration::from_secs(5 * 60);

/// Memory-pressure signal forwarded by the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Normal,
    /// Drop expired entries eagerly.
    Elevated,
    /// Drop everything.
    Critical,
}

#[derive(Clone, Debug)]
struct CacheEntry<T> {
    data: T,
    timestamp: SystemTime,
}

impl<T> CacheEntry<T> {
    fn new(data: T) -> Self {
        Self { data, timestamp: SystemTime::now() }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.timestamp.elapsed().unwrap_or(Duration::ZERO) > ttl
    }
}

/// Evict expired entries; if the map is still over `limit`, drop the oldest
/// entries until it fits.
fn enforce_limit<T>(map: &mut HashMap<String, CacheEntry<T>>, limit: usize, ttl: Duration) {
    if map.len() <= limit {
        return;
    }
    map.retain(|_, v| !v.is_expired(ttl));
    if map.len() <= limit {
        return;
    }
    let mut by_age: Vec<(String, SystemTime)> =
        map.iter().map(|(k, v)| (k.clone(), v.timestamp)).collect();
    by_age.sort_by_key(|(_, ts)| *ts);
    let excess = map.len() - limit;
    for (key, _) in by_age.into_iter().take(excess) {
        map.remove(&key);
    }
}

fn scoped_key(session_id: &str, model: &str) -> String {
    format!("{}:{}", session_id, model)
}

/// Per-(session, model) cache of the two opaque continuation signatures the
/// upstream requires on thinking and tool continuations.
pub struct SignatureCache {
    reasoning: RwLock<HashMap<String, CacheEntry<String>>>,
    tool: RwLock<HashMap<String, CacheEntry<String>>>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self { reasoning: RwLock::new(HashMap::new()), tool: RwLock::new(HashMap::new()) }
    }

    pub fn set_reasoning_signature(&self, session_id: &str, model: &str, signature: String) {
        if signature.is_empty() {
            return;
        }
        let mut cache = self.reasoning.write();
        cache.insert(scoped_key(session_id, model), CacheEntry::new(signature));
        enforce_limit(&mut cache, CACHE_LIMIT, ENTRY_TTL);
    }

    pub fn get_reasoning_signature(&self, session_id: &str, model: &str) -> Option<String> {
        let cache = self.reasoning.read();
        cache
            .get(&scoped_key(session_id, model))
            .filter(|e| !e.is_expired(ENTRY_TTL))
            .map(|e| e.data.clone())
    }

    pub fn set_tool_signature(&self, session_id: &str, model: &str, signature: String) {
        if signature.is_empty() {
            return;
        }
        let mut cache = self.tool.write();
        cache.insert(scoped_key(session_id, model), CacheEntry::new(signature));
        enforce_limit(&mut cache, CACHE_LIMIT, ENTRY_TTL);
    }

    pub fn get_tool_signature(&self, session_id: &str, model: &str) -> Option<String> {
        let cache = self.tool.read();
        cache
            .get(&scoped_key(session_id, model))
            .filter(|e| !e.is_expired(ENTRY_TTL))
            .map(|e| e.data.clone())
    }

    pub fn pressure_notify(&self, level: PressureLevel) {
        match level {
            PressureLevel::Normal => {},
            PressureLevel::Elevated => {
                self.reasoning.write().retain(|_, v| !v.is_expired(ENTRY_TTL));
                self.tool.write().retain(|_, v| !v.is_expired(ENTRY_TTL));
            },
            PressureLevel::Critical => {
                self.reasoning.write().clear();
                self.tool.write().clear();
            },
        }
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Reverse mapping from a sanitized tool name back to the client's original
/// name, keyed by (session, model, sanitized). Upstream only accepts
/// identifier-safe names, but the client must see its own names echoed back.
pub struct ToolNameCache {
    map: RwLock<HashMap<String, CacheEntry<String>>>,
}

impl ToolNameCache {
    pub fn new() -> Self {
        Self { map: RwLock::new(HashMap::new()) }
    }

    fn key(session_id: &str, model: &str, sanitized: &str) -> String {
        format!("{}:{}:{}", session_id, model, sanitized)
    }

    pub fn record(&self, session_id: &str, model: &str, sanitized: &str, original: &str) {
        let mut cache = self.map.write();
        cache.insert(
            Self::key(session_id, model, sanitized),
            CacheEntry::new(original.to_string()),
        );
        enforce_limit(&mut cache, CACHE_LIMIT, ENTRY_TTL);
    }

    pub fn original_name(&self, session_id: &str, model: &str, sanitized: &str) -> Option<String> {
        let cache = self.map.read();
        cache
            .get(&Self::key(session_id, model, sanitized))
            .filter(|e| !e.is_expired(ENTRY_TTL))
            .map(|e| e.data.clone())
    }

    pub fn pressure_notify(&self, level: PressureLevel) {
        match level {
            PressureLevel::Normal => {},
            PressureLevel::Elevated => {
                self.map.write().retain(|_, v| !v.is_expired(ENTRY_TTL));
            },
            PressureLevel::Critical => self.map.write().clear(),
        }
    }
}

impl Default for ToolNameCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Memoized model-list response, one slot per protocol surface.
pub struct ModelListCache {
    map: RwLock<HashMap<String, CacheEntry<Value>>>,
}

impl ModelListCache {
    pub fn new() -> Self {
        Self { map: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, surface: &str) -> Option<Value> {
        let cache = self.map.read();
        cache
            .get(surface)
            .filter(|e| !e.is_expired(MODEL_LIST_TTL))
            .map(|e| e.data.clone())
    }

    pub fn set(&self, surface: &str, body: Value) {
        self.map.write().insert(surface.to_string(), CacheEntry::new(body));
    }

    pub fn pressure_notify(&self, level: PressureLevel) {
        if level == PressureLevel::Critical {
            self.map.write().clear();
        }
    }
}

impl Default for ModelListCache {
    fn default() -> Self {
        Self::new()
    }
}

/// All shared caches, handed to converters, the stream parser and handlers.
pub struct CacheRegistry {
    pub signatures: SignatureCache,
    pub tool_names: ToolNameCache,
    pub models: ModelListCache,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            signatures: SignatureCache::new(),
            tool_names: ToolNameCache::new(),
            models: ModelListCache::new(),
        }
    }

    /// Process-wide instance for the server binary. Tests should construct
    /// their own registry instead.
    pub fn global() -> &'static CacheRegistry {
        static INSTANCE: OnceLock<CacheRegistry> = OnceLock::new();
        INSTANCE.get_or_init(CacheRegistry::new)
    }

    pub fn pressure_notify(&self, level: PressureLevel) {
        self.signatures.pressure_notify(level);
        self.tool_names.pressure_notify(level);
        self.models.pressure_notify(level);
        if level != PressureLevel::Normal {
            tracing::debug!("[Caches] Pressure notification handled: {:?}", level);
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_cache_is_scoped_by_session_and_model() {
        let cache = SignatureCache::new();
        cache.set_reasoning_signature("-1", "gemini-3-pro", "sig-a".into());
        assert_eq!(cache.get_reasoning_signature("-1", "gemini-3-pro").as_deref(), Some("sig-a"));
        assert!(cache.get_reasoning_signature("-2", "gemini-3-pro").is_none());
        assert!(cache.get_reasoning_signature("-1", "gemini-2.5-flash").is_none());
    }

    #[test]
    fn reasoning_and_tool_signatures_are_independent() {
        let cache = SignatureCache::new();
        cache.set_reasoning_signature("-1", "m", "reason".into());
        cache.set_tool_signature("-1", "m", "tool".into());
        assert_eq!(cache.get_reasoning_signature("-1", "m").as_deref(), Some("reason"));
        assert_eq!(cache.get_tool_signature("-1", "m").as_deref(), Some("tool"));
    }

    #[test]
    fn empty_signature_is_not_stored() {
        let cache = SignatureCache::new();
        cache.set_reasoning_signature("-1", "m", String::new());
        assert!(cache.get_reasoning_signature("-1", "m").is_none());
    }

    #[test]
    fn oldest_entries_evicted_over_limit() {
        let mut map: HashMap<String, CacheEntry<String>> = HashMap::new();
        for i in 0..10u64 {
            let mut entry = CacheEntry::new(format!("v{i}"));
            // Backdate entries so insertion order equals age order.
            entry.timestamp = SystemTime::now() - Duration::from_secs(100 - i);
            map.insert(format!("k{i}"), entry);
        }
        enforce_limit(&mut map, 4, ENTRY_TTL);
        assert_eq!(map.len(), 4);
        // The four youngest survive.
        for i in 6..10 {
            assert!(map.contains_key(&format!("k{i}")), "expected k{i} to survive");
        }
    }

    #[test]
    fn critical_pressure_clears_everything() {
        let registry = CacheRegistry::new();
        registry.signatures.set_tool_signature("-1", "m", "sig".into());
        registry.tool_names.record("-1", "m", "tool", "my/tool");
        registry.pressure_notify(PressureLevel::Critical);
        assert!(registry.signatures.get_tool_signature("-1", "m").is_none());
        assert!(registry.tool_names.original_name("-1", "m", "tool").is_none());
    }
}
