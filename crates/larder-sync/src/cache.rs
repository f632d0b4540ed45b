//! # Response Cache
//!
//! Bounded, recency-ordered memo of successful read responses.
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  set(key, value)                                                        │
//! │    │  full? ──► evict least recently used                              │
//! │    ▼                                                                    │
//! │  [ value, inserted_at, ttl, last_used ]                                 │
//! │    │                                                                    │
//! │  get(key)                                                               │
//! │    ├── now - inserted_at < ttl ──► hit, last_used = next tick          │
//! │    └── expired ──► purged, miss                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Time comes from `tokio::time::Instant` so paused-clock tests can expire
//! entries without sleeping.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    /// Path the response came from, for invalidation.
    path: String,
    last_used: u64,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    max_entries: usize,
    default_ttl: Duration,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ResponseCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        ResponseCache {
            entries: HashMap::new(),
            max_entries,
            default_ttl,
            tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Returns a valid entry and marks it most recently used.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let valid = match self.entries.get(key) {
            Some(entry) => entry.is_valid(now),
            None => {
                self.misses += 1;
                return None;
            }
        };

        if !valid {
            self.entries.remove(key);
            self.misses += 1;
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        let tick = self.next_tick();
        self.hits += 1;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.value.clone()
        })
    }

    /// Stores a value with the default TTL.
    pub fn set(&mut self, key: impl Into<String>, path: impl Into<String>, value: Value) {
        let ttl = self.default_ttl;
        self.set_with_ttl(key, path, value, ttl);
    }

    pub fn set_with_ttl(
        &mut self,
        key: impl Into<String>,
        path: impl Into<String>,
        value: Value,
        ttl: Duration,
    ) {
        if self.max_entries == 0 {
            return;
        }

        let key = key.into();
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.max_entries {
                if !self.evict_lru() {
                    break;
                }
            }
        }

        let last_used = self.next_tick();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
                path: path.into(),
                last_used,
            },
        );
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());

        match victim {
            Some(key) => {
                self.entries.remove(&key);
                self.evictions += 1;
                debug!(key = %key, "Evicted least recently used cache entry");
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops every entry whose path starts with `prefix`. Returns the count.
    pub fn invalidate_path(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.path.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_entry_valid_until_ttl() {
        let mut cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.set("k", "/recipes", json!([1, 2]));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("k"), Some(json!([1, 2])));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction() {
        let mut cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", "/recipes", json!("a"));
        cache.set("b", "/recipes", json!("b"));

        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("a").is_some());
        cache.set("c", "/recipes", json!("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_evict() {
        let mut cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", "/recipes", json!(1));
        cache.set("b", "/recipes", json!(2));
        cache.set("a", "/recipes", json!(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(json!(3)));
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_path() {
        let mut cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.set("list", "/recipes", json!([]));
        cache.set("one", "/recipes/r1", json!({}));
        cache.set("col", "/collections", json!([]));

        assert_eq!(cache.invalidate_path("/recipes"), 2);
        assert_eq!(cache.len(), 1);
    }
}
