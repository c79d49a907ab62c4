use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            default_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
    last_accessed_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Named TTL cache with LRU eviction.
///
/// Expired entries are evicted lazily on access and counted as misses. When
/// an insert would exceed capacity, the entry with the oldest
/// `last_accessed_at` is evicted first.
pub struct TtlCache {
    name: String,
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl TtlCache {
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let mut expired = false;
        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.is_expired(now) {
                expired = true;
            } else {
                entry.last_accessed_at = now;
                let value = entry.value.clone();
                inner.hits += 1;
                debug!("Cache '{}' hit: {}", self.name, key);
                return Some(value);
            }
        }

        if expired {
            inner.entries.remove(key);
            debug!("Cache '{}' expired entry: {}", self.name, key);
        } else {
            debug!("Cache '{}' miss: {}", self.name, key);
        }
        inner.misses += 1;
        None
    }

    /// Insert or overwrite. `ttl = None` uses the cache's default TTL.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.config.capacity {
            if let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed_at)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&lru_key);
                debug!("Cache '{}' full, evicted: {}", self.name, lru_key);
            }
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                ttl: ttl.unwrap_or(self.config.default_ttl),
                last_accessed_at: now,
            },
        );
    }

    /// Remove all entries whose key starts with `pattern`. Returns the number
    /// of entries removed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(pattern));
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!("Cache '{}' invalidated {} entries matching '{}'", self.name, removed, pattern);
        }
        removed
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let total = inner.hits + inner.misses;
        CacheStats {
            name: self.name.clone(),
            size: inner.entries.len(),
            capacity: self.config.capacity,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if total > 0 {
                inner.hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Standard cache namespaces by data volatility: `api` for reference data
/// (minutes), `race_data` for near-real-time odds and pools (tens of
/// seconds). Resulted/historical responses ride in `api` with a per-request
/// TTL override of hours.
pub const API_NAMESPACE: &str = "api";
pub const RACE_DATA_NAMESPACE: &str = "race_data";

/// Registry of named cache instances sharing one lock-per-cache model.
pub struct CacheRegistry {
    caches: Mutex<HashMap<String, Arc<TtlCache>>>,
    default_config: CacheConfig,
}

impl CacheRegistry {
    pub fn new(default_config: CacheConfig) -> Self {
        Self {
            caches: Mutex::new(HashMap::new()),
            default_config,
        }
    }

    /// Build a registry pre-seeded with caches, so construction does not need
    /// an async context.
    pub fn with_caches(default_config: CacheConfig, caches: Vec<Arc<TtlCache>>) -> Self {
        let map = caches
            .into_iter()
            .map(|cache| (cache.name().to_string(), cache))
            .collect();
        Self {
            caches: Mutex::new(map),
            default_config,
        }
    }

    /// Register a namespace with an explicit configuration, replacing any
    /// existing cache of the same name.
    pub async fn register(&self, name: &str, config: CacheConfig) {
        let mut caches = self.caches.lock().await;
        caches.insert(name.to_string(), Arc::new(TtlCache::new(name, config)));
    }

    pub async fn get_or_create(&self, name: &str) -> Arc<TtlCache> {
        let mut caches = self.caches.lock().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TtlCache::new(name, self.default_config.clone())))
            .clone()
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let cache = self.get_or_create(namespace).await;
        cache.get(key).await
    }

    pub async fn set(&self, namespace: &str, key: &str, value: Value, ttl: Option<Duration>) {
        let cache = self.get_or_create(namespace).await;
        cache.set(key, value, ttl).await;
    }

    pub async fn invalidate(&self, namespace: &str, pattern: &str) -> usize {
        let cache = {
            let caches = self.caches.lock().await;
            caches.get(namespace).cloned()
        };
        match cache {
            Some(cache) => cache.invalidate(pattern).await,
            None => 0,
        }
    }

    pub async fn stats(&self, namespace: &str) -> Option<CacheStats> {
        let cache = {
            let caches = self.caches.lock().await;
            caches.get(namespace).cloned()
        };
        match cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    pub async fn all_stats(&self) -> Vec<CacheStats> {
        let caches: Vec<Arc<TtlCache>> = {
            let caches = self.caches.lock().await;
            caches.values().cloned().collect()
        };
        let mut stats = Vec::with_capacity(caches.len());
        for cache in caches {
            stats.push(cache.stats().await);
        }
        stats
    }

    pub async fn clear_all(&self) {
        let caches: Vec<Arc<TtlCache>> = {
            let caches = self.caches.lock().await;
            caches.values().cloned().collect()
        };
        for cache in caches {
            cache.clear().await;
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Deterministic cache key from endpoint path and query parameters.
///
/// Parameters are sorted so argument order never splits the key space.
/// Jurisdiction is always one of the parameters, which keeps responses for
/// different jurisdictions apart.
pub fn cache_key(path: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let mut key = String::from(path);
    for (i, (name, value)) in sorted.iter().enumerate() {
        key.push(if i == 0 { '?' } else { '&' });
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::sleep;

    fn cache(capacity: usize, ttl_ms: u64) -> TtlCache {
        TtlCache::new(
            "test",
            CacheConfig {
                capacity,
                default_ttl: Duration::from_millis(ttl_ms),
            },
        )
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = cache(8, 1000);
        cache.set("a", json!({"x": 1}), None).await;
        assert_eq!(cache.get("a").await, Some(json!({"x": 1})));
        assert_eq!(cache.get("b").await, None);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let cache = cache(8, 80);
        cache.set("a", json!(1), None).await;

        sleep(Duration::from_millis(40)).await;
        assert!(cache.get("a").await.is_some());

        sleep(Duration::from_millis(60)).await;
        assert!(cache.get("a").await.is_none());

        // Expiry counted as a miss
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_per_entry_ttl_override() {
        let cache = cache(8, 10_000);
        cache
            .set("short", json!(1), Some(Duration::from_millis(40)))
            .await;
        cache.set("long", json!(2), None).await;

        sleep(Duration::from_millis(60)).await;
        assert!(cache.get("short").await.is_none());
        assert!(cache.get("long").await.is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let cache = cache(3, 10_000);
        cache.set("a", json!(1), None).await;
        sleep(Duration::from_millis(5)).await;
        cache.set("b", json!(2), None).await;
        sleep(Duration::from_millis(5)).await;
        cache.set("c", json!(3), None).await;
        sleep(Duration::from_millis(5)).await;

        // A is least recently used; D evicts it
        cache.set("d", json!(4), None).await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn test_get_refreshes_lru_position() {
        let cache = cache(3, 10_000);
        cache.set("a", json!(1), None).await;
        sleep(Duration::from_millis(5)).await;
        cache.set("b", json!(2), None).await;
        sleep(Duration::from_millis(5)).await;
        cache.set("c", json!(3), None).await;
        sleep(Duration::from_millis(5)).await;

        // Touch A so B becomes the eviction candidate
        cache.get("a").await;
        sleep(Duration::from_millis(5)).await;
        cache.set("d", json!(4), None).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = cache(2, 10_000);
        cache.set("a", json!(1), None).await;
        cache.set("b", json!(2), None).await;
        cache.set("a", json!(3), None).await;

        assert_eq!(cache.get("a").await, Some(json!(3)));
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let cache = cache(8, 10_000);
        cache.set("/racing/dates?j=NSW", json!(1), None).await;
        cache.set("/racing/dates?j=VIC", json!(2), None).await;
        cache.set("/sports?j=NSW", json!(3), None).await;

        let removed = cache.invalidate("/racing/").await;
        assert_eq!(removed, 2);
        assert!(cache.get("/sports?j=NSW").await.is_some());
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = cache(8, 10_000);
        cache.set("a", json!(1), None).await;
        cache.get("a").await;
        cache.get("a").await;
        cache.get("missing").await;

        let stats = cache.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_registry_namespaces_are_isolated() {
        let registry = CacheRegistry::default();
        registry.set(API_NAMESPACE, "k", json!(1), None).await;
        registry.set(RACE_DATA_NAMESPACE, "k", json!(2), None).await;

        assert_eq!(registry.get(API_NAMESPACE, "k").await, Some(json!(1)));
        assert_eq!(registry.get(RACE_DATA_NAMESPACE, "k").await, Some(json!(2)));

        assert_eq!(registry.invalidate(API_NAMESPACE, "k").await, 1);
        assert_eq!(registry.get(API_NAMESPACE, "k").await, None);
        assert_eq!(registry.get(RACE_DATA_NAMESPACE, "k").await, Some(json!(2)));
    }

    #[test]
    fn test_cache_key_is_order_insensitive() {
        let a = cache_key(
            "/v1/tab-info-service/racing/dates",
            &[
                ("jurisdiction".to_string(), "NSW".to_string()),
                ("fixedOdds".to_string(), "true".to_string()),
            ],
        );
        let b = cache_key(
            "/v1/tab-info-service/racing/dates",
            &[
                ("fixedOdds".to_string(), "true".to_string()),
                ("jurisdiction".to_string(), "NSW".to_string()),
            ],
        );
        assert_eq!(a, b);
        assert!(a.contains("jurisdiction=NSW"));
    }

    #[test]
    fn test_cache_key_separates_jurisdictions() {
        let nsw = cache_key(
            "/v1/tab-info-service/sports",
            &[("jurisdiction".to_string(), "NSW".to_string())],
        );
        let vic = cache_key(
            "/v1/tab-info-service/sports",
            &[("jurisdiction".to_string(), "VIC".to_string())],
        );
        assert_ne!(nsw, vic);
    }
}
