//! Cache store for embeddings, search results and documents
//!
//! All three caches of the RAG core share one key space, separated by prefix:
//!
//! - `embedding:<sha256(text|model)>` - embedding vectors (24h)
//! - `search:<query>:<top_k>:<min_score>` - ranked search results (1h)
//! - `doc:<doc_id>` - document details (24h)
//!
//! Prefix scans let the document pipeline drop every cached search result at
//! once after an update or delete.
//!
//! # Example
//!
//! ```ignore
//! use ares_rag::rag::cache::{CacheStore, InMemoryCacheStore, CacheConfig};
//!
//! let cache = InMemoryCacheStore::new(CacheConfig::default());
//! cache.set_json("doc:42", &detail, Some(Duration::from_secs(3600)))?;
//! let hit: Option<DocumentDetail> = cache.get_json("doc:42")?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Result;

/// Prefix of embedding cache keys
pub const EMBEDDING_PREFIX: &str = "embedding:";
/// Prefix of search result cache keys
pub const SEARCH_PREFIX: &str = "search:";
/// Prefix of document cache keys
pub const DOC_PREFIX: &str = "doc:";

/// Key of a cached embedding for `text` produced by `model`.
pub fn embedding_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    format!("{}{}", EMBEDDING_PREFIX, hex::encode(hasher.finalize()))
}

/// Key of a cached search result list.
///
/// `min_score` is printed in full so thresholds that only differ in later
/// decimals never share an entry.
pub fn search_key(query: &str, top_k: usize, min_score: f32) -> String {
    format!("{}{}:{}:{}", SEARCH_PREFIX, query, top_k, min_score)
}

/// Key of a cached document detail.
pub fn doc_key(doc_id: u64) -> String {
    format!("{}{}", DOC_PREFIX, doc_id)
}

// ============================================================================
// Cache Types
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Current size in bytes (keys plus values)
    pub size_bytes: u64,
    pub entry_count: usize,
    /// Number of evictions due to capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Configuration for the in-memory cache store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cache size in bytes (default: 256MB)
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// TTL applied when `set` is called without one (None = no expiry)
    #[serde(default)]
    pub default_ttl: Option<Duration>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_size_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
            default_ttl: None,
            enabled: default_enabled(),
        }
    }
}

// ============================================================================
// Cache Trait
// ============================================================================

/// Key/value cache with per-entry TTL and prefix scans.
///
/// Values are opaque bytes; [`CacheStoreExt`] adds JSON helpers on top.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store a value, replacing any previous one
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Live keys starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// Delete every key starting with `prefix`, returning how many were removed
    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys_with_prefix(prefix);
        for key in &keys {
            self.delete(key)?;
        }
        Ok(keys.len())
    }

    fn stats(&self) -> CacheStats;
}

/// Typed access on top of any [`CacheStore`].
pub trait CacheStoreExt: CacheStore {
    /// Decode a cached JSON value. Undecodable entries are dropped and
    /// reported as a miss.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Dropping undecodable cache entry");
                let _ = self.delete(key);
                None
            }
        }
    }

    fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, ttl)
    }
}

impl<C: CacheStore + ?Sized> CacheStoreExt for C {}

// ============================================================================
// LRU Cache Entry
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    size_bytes: usize,
}

impl CacheEntry {
    fn new(key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Self {
        let size_bytes = key.len() + value.len();
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
            size_bytes,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() > exp)
            .unwrap_or(false)
    }
}

// ============================================================================
// In-Memory Cache Store
// ============================================================================

struct LruState {
    entries: LruCache<String, CacheEntry>,
    size_bytes: u64,
}

impl LruState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.size_bytes = self.size_bytes.saturating_sub(entry.size_bytes as u64);
        Some(entry)
    }
}

/// In-memory cache bounded by total byte size.
///
/// Recency order is kept by `lru::LruCache`; when an insert would exceed
/// `max_size_bytes` the least recently used entries are evicted first.
/// Expired entries are removed lazily on access and by [`cleanup_expired`].
///
/// [`cleanup_expired`]: InMemoryCacheStore::cleanup_expired
pub struct InMemoryCacheStore {
    state: Mutex<LruState>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                size_bytes: 0,
            }),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn with_max_size(max_size_bytes: u64) -> Self {
        Self::new(CacheConfig {
            max_size_bytes,
            ..Default::default()
        })
    }

    /// Remove expired entries from the cache
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.state.lock().size_bytes
    }

    fn evict_for(&self, state: &mut LruState, needed_bytes: usize) {
        let target = self
            .config
            .max_size_bytes
            .saturating_sub(needed_bytes as u64);

        while state.size_bytes > target {
            match state.entries.pop_lru() {
                Some((_, entry)) => {
                    state.size_bytes = state.size_bytes.saturating_sub(entry.size_bytes as u64);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.config.enabled {
            return None;
        }

        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let entry = CacheEntry::new(key, value, ttl.or(self.config.default_ttl));
        let entry_size = entry.size_bytes;

        let mut state = self.state.lock();
        state.remove(key);

        if entry_size as u64 > self.config.max_size_bytes {
            // Larger than the whole cache, never stored
            return Ok(());
        }

        if state.size_bytes + entry_size as u64 > self.config.max_size_bytes {
            self.evict_for(&mut state, entry_size);
        }

        state.size_bytes += entry_size as u64;
        state.entries.put(key.to_string(), entry);

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.state.lock().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size_bytes: state.size_bytes,
            entry_count: state.entries.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// No-Op Cache
// ============================================================================

/// A cache that never stores anything.
#[derive(Debug, Default)]
pub struct NoOpCache;

impl NoOpCache {
    pub fn new() -> Self {
        Self
    }
}

impl CacheStore for NoOpCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn keys_with_prefix(&self, _prefix: &str) -> Vec<String> {
        Vec::new()
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_key_computation() {
        let key1 = embedding_key("hello world", "text-embedding-v3");
        let key2 = embedding_key("hello world", "text-embedding-v3");
        let key3 = embedding_key("hello world", "bge-m3");
        let key4 = embedding_key("different text", "text-embedding-v3");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key1, key4);
        assert!(key1.starts_with(EMBEDDING_PREFIX));
    }

    #[test]
    fn test_search_key_format() {
        assert_eq!(search_key("rust", 5, 0.5), "search:rust:5:0.5");
        assert_ne!(search_key("rust", 5, 0.546), search_key("rust", 5, 0.554));
        assert_eq!(doc_key(42), "doc:42");
    }

    #[test]
    fn test_cache_set_and_get() {
        let cache = InMemoryCacheStore::with_defaults();

        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().misses, 1);

        cache.set("k", b"value".to_vec(), None).unwrap();
        assert_eq!(cache.get("k").unwrap(), b"value".to_vec());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_json_helpers() {
        let cache = InMemoryCacheStore::with_defaults();
        cache.set_json("v", &vec![1.0f32, 2.5], None).unwrap();

        let back: Vec<f32> = cache.get_json("v").unwrap();
        assert_eq!(back, vec![1.0, 2.5]);

        cache.set("bad", b"not json".to_vec(), None).unwrap();
        assert!(cache.get_json::<Vec<f32>>("bad").is_none());
        assert!(cache.get("bad").is_none());
    }

    #[test]
    fn test_prefix_scan_and_delete() {
        let cache = InMemoryCacheStore::with_defaults();
        cache.set("search:a:5:0.00", vec![1], None).unwrap();
        cache.set("search:b:5:0.00", vec![2], None).unwrap();
        cache.set("doc:1", vec![3], None).unwrap();

        let mut keys = cache.keys_with_prefix(SEARCH_PREFIX);
        keys.sort();
        assert_eq!(keys, vec!["search:a:5:0.00", "search:b:5:0.00"]);

        assert_eq!(cache.delete_prefix(SEARCH_PREFIX).unwrap(), 2);
        assert!(cache.keys_with_prefix(SEARCH_PREFIX).is_empty());
        assert!(cache.get("doc:1").is_some());
    }

    #[test]
    fn test_cache_lru_eviction() {
        // Each entry is 2 (key) + 14 (value) = 16 bytes
        let cache = InMemoryCacheStore::with_max_size(32);

        cache.set("k1", vec![0; 14], None).unwrap();
        cache.set("k2", vec![0; 14], None).unwrap();

        // Touch k1 so k2 becomes least recently used
        assert!(cache.get("k1").is_some());

        cache.set("k3", vec![0; 14], None).unwrap();

        assert!(cache.get("k2").is_none());
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k3").is_some());
        assert!(cache.stats().evictions > 0);
        assert!(cache.size_bytes() <= 32);
    }

    #[test]
    fn test_cache_ttl_expiry() {
        let cache = InMemoryCacheStore::with_defaults();
        cache
            .set("k", vec![1, 2, 3], Some(Duration::from_nanos(1)))
            .unwrap();

        std::thread::sleep(Duration::from_millis(2));

        assert!(cache.get("k").is_none());
        assert!(cache.keys_with_prefix("k").is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = InMemoryCacheStore::with_defaults();
        cache
            .set("short", vec![1], Some(Duration::from_nanos(1)))
            .unwrap();
        cache.set("long", vec![1], None).unwrap();

        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_and_noop() {
        let cache = InMemoryCacheStore::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        cache.set("k", vec![1], None).unwrap();
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());

        let noop = NoOpCache::new();
        noop.set("k", vec![1], None).unwrap();
        assert!(noop.get("k").is_none());
        assert_eq!(noop.delete_prefix("").unwrap(), 0);
    }

    #[test]
    fn test_cache_hit_rate() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..Default::default()
        };

        assert!((stats.hit_rate() - 75.0).abs() < 0.001);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
