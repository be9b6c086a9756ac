//! Search result caching
//!
//! Provides caching for store query pages with:
//! - Exact lookup on a hash of (collection, full query)
//! - TTL-based expiration
//! - Bounded capacity with oldest-first eviction

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SearchSettings;
use crate::storage::FeedPage;

/// A cached search result entry
#[derive(Debug)]
pub struct CachedPage {
    /// The cached store page
    pub page: FeedPage,
    /// When this entry was created
    pub created_at: Instant,
    /// Number of times this cache entry was hit
    pub hit_count: AtomicU64,
}

impl CachedPage {
    pub fn new(page: FeedPage) -> Self {
        Self {
            page,
            created_at: Instant::now(),
            hit_count: AtomicU64::new(0),
        }
    }

    /// Check if this entry is expired
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }

    pub fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Configuration for the result cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for cache entries (default: 5 minutes)
    pub ttl_seconds: u64,
    /// Maximum number of cache entries (default: 100)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            max_entries: 100,
        }
    }
}

impl From<&SearchSettings> for CacheConfig {
    fn from(settings: &SearchSettings) -> Self {
        Self {
            ttl_seconds: settings.cache_ttl_seconds,
            max_entries: settings.max_cache_entries,
        }
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub invalidations: u64,
    pub evictions: u64,
    pub ttl_seconds: u64,
}

/// Concurrent, bounded cache of store pages
pub struct SearchResultCache {
    /// Entries keyed by hex hash of (collection, query)
    entries: DashMap<String, Arc<CachedPage>>,
    config: CacheConfig,
    stats: CacheStats,
}

impl SearchResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_seconds)
    }

    /// Cache key for a query against one collection
    pub fn cache_key<Q: Hash>(collection: &str, query: &Q) -> String {
        let mut hasher = DefaultHasher::new();
        collection.hash(&mut hasher);
        query.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Fresh cached page for `key`; expired entries are dropped on the way
    pub fn get(&self, key: &str) -> Option<FeedPage> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(self.ttl()) {
                entry.record_hit();
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.page.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a page, evicting the oldest entry when at capacity
    pub fn put(&self, key: String, page: FeedPage) {
        if self.config.max_entries == 0 {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }

        self.entries.insert(key, Arc::new(CachedPage::new(page)));
    }

    fn evict_oldest(&self) {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|entry| entry.created_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest_key {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove expired entries
    pub fn remove_expired(&self) -> usize {
        let ttl = self.ttl();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(ttl));
        before.saturating_sub(self.entries.len())
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        self.stats
            .invalidations
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStatsResponse {
        CacheStatsResponse {
            entries: self.entries.len(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            hit_rate: self.stats.hit_rate(),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            ttl_seconds: self.config.ttl_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(id: &str) -> FeedPage {
        FeedPage {
            items: vec![json!({ "id": id })],
            continuation: None,
        }
    }

    #[test]
    fn test_cache_put_get() {
        let cache = SearchResultCache::new(CacheConfig::default());
        let key = SearchResultCache::cache_key("conversations", &"query");

        cache.put(key.clone(), page("a"));
        assert_eq!(cache.get(&key), Some(page("a")));
    }

    #[test]
    fn test_cache_miss() {
        let cache = SearchResultCache::new(CacheConfig::default());
        assert!(cache.get("nonexistent").is_none());
    }

    #[test]
    fn test_collection_is_part_of_key() {
        assert_ne!(
            SearchResultCache::cache_key("conversations", &"q"),
            SearchResultCache::cache_key("messages", &"q")
        );
        assert_eq!(
            SearchResultCache::cache_key("messages", &"q"),
            SearchResultCache::cache_key("messages", &"q")
        );
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = SearchResultCache::new(CacheConfig {
            ttl_seconds: 0,
            ..Default::default()
        });
        cache.put("k".to_string(), page("a"));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let cache = SearchResultCache::new(CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        cache.put("first".to_string(), page("1"));
        std::thread::sleep(Duration::from_millis(2));
        cache.put("second".to_string(), page("2"));
        std::thread::sleep(Duration::from_millis(2));
        cache.put("third".to_string(), page("3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
        assert!(cache.get("third").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let cache = SearchResultCache::new(CacheConfig {
            max_entries: 1,
            ..Default::default()
        });
        cache.put("k".to_string(), page("1"));
        cache.put("k".to_string(), page("2"));
        assert_eq!(cache.get("k"), Some(page("2")));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_clear_counts_invalidations() {
        let cache = SearchResultCache::new(CacheConfig::default());
        cache.put("a".to_string(), page("a"));
        cache.put("b".to_string(), page("b"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[test]
    fn test_stats() {
        let cache = SearchResultCache::new(CacheConfig::default());

        cache.get("query");
        cache.put("query".to_string(), page("a"));
        cache.get("query");
        cache.get("query");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert!(stats.hit_rate > 0.6);
    }
}
