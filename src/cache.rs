//! Size-bounded in-memory response cache with TTL.
//!
//! Entries are ordered by an [`lru::LruCache`] and bounded by accounted
//! bytes rather than entry count. A background sweep evicts expired
//! entries once a minute so memory is reclaimed even for keys nobody
//! reads again.

use lru::LruCache;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::models::PageData;

/// Fixed per-entry overhead added to the accounted cost, covering keys,
/// map nodes, and the non-textual `PageData` fields.
const ENTRY_OVERHEAD: usize = 1024;

/// Interval of the background expiry sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CacheEntry {
    data: PageData,
    expires_at: Instant,
    cost: u64,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    size_bytes: u64,
    hits: u64,
    misses: u64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: u64,
    pub max_size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0.0 before any lookup.
    pub hit_rate: f64,
    /// size_bytes / max_size_bytes.
    pub utilization: f64,
}

/// LRU + TTL cache for fetch results.
///
/// Must be constructed inside a tokio runtime; `new` spawns the sweep
/// task. All methods are cheap and never hold the lock across an await.
pub struct MemoryCache {
    inner: Arc<Mutex<CacheInner>>,
    max_size_bytes: u64,
    default_ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCache {
    /// Create a cache bounded to `max_size_bytes` with `default_ttl`
    /// applied when `set` is called without an explicit TTL. Zero values
    /// fall back to 100 MB / 5 minutes.
    #[must_use]
    pub fn new(max_size_bytes: u64, default_ttl: Duration) -> Self {
        let max_size_bytes = if max_size_bytes > 0 {
            max_size_bytes
        } else {
            100 * 1024 * 1024
        };
        let default_ttl = if default_ttl > Duration::ZERO {
            default_ttl
        } else {
            Duration::from_secs(300)
        };

        let inner = Arc::new(Mutex::new(CacheInner {
            entries: LruCache::unbounded(),
            size_bytes: 0,
            hits: 0,
            misses: 0,
        }));

        let sweep_inner = Arc::clone(&inner);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep_expired(&sweep_inner);
            }
        });

        Self {
            inner,
            max_size_bytes,
            default_ttl,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Look up a fresh entry, promoting it to most-recently-used.
    ///
    /// An expired entry counts as a miss; its removal is handed to a
    /// spawned task so the read path stays cheap.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PageData> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let lookup = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(Some(entry.data.clone())),
            Some(_) => Some(None),
            None => None,
        };
        match lookup {
            Some(Some(data)) => {
                inner.hits += 1;
                trace!(key, "cache hit");
                Some(data)
            }
            Some(None) => {
                inner.misses += 1;
                trace!(key, "cache entry expired");
                let inner = Arc::clone(&self.inner);
                let key = key.to_string();
                tokio::spawn(async move {
                    remove_entry(&inner, &key);
                });
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a result under `key`. `ttl` of `None` uses the default TTL.
    /// Entries larger than the whole cache are refused.
    pub fn set(&self, key: &str, data: PageData, ttl: Option<Duration>) {
        let cost = (data.byte_cost() + ENTRY_OVERHEAD) as u64;
        if cost > self.max_size_bytes {
            warn!(key, cost, "entry larger than cache, not storing");
            return;
        }
        let ttl = ttl.unwrap_or(self.default_ttl);

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = inner.entries.pop(key) {
            inner.size_bytes -= old.cost;
        }
        inner.entries.put(
            key.to_string(),
            CacheEntry {
                data,
                expires_at: Instant::now() + ttl,
                cost,
            },
        );
        inner.size_bytes += cost;

        // Evict least-recently-used entries until back under the bound.
        while inner.size_bytes > self.max_size_bytes {
            match inner.entries.pop_lru() {
                Some((victim, entry)) => {
                    inner.size_bytes -= entry.cost;
                    debug!(key = %victim, "evicted LRU cache entry");
                }
                None => break,
            }
        }
    }

    /// Remove one entry; returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        remove_entry(&self.inner, key)
    }

    /// Drop every entry and reset the hit/miss counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
        inner.size_bytes = 0;
        inner.hits = 0;
        inner.misses = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let lookups = inner.hits + inner.misses;
        CacheStats {
            entries: inner.entries.len(),
            size_bytes: inner.size_bytes,
            max_size_bytes: self.max_size_bytes,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups > 0 {
                inner.hits as f64 / lookups as f64
            } else {
                0.0
            },
            utilization: inner.size_bytes as f64 / self.max_size_bytes as f64,
        }
    }

    /// Stop the background sweep. Idempotent; entries stay readable.
    pub fn close(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.close();
    }
}

fn remove_entry(inner: &Mutex<CacheInner>, key: &str) -> bool {
    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    match inner.entries.pop(key) {
        Some(entry) => {
            inner.size_bytes -= entry.cost;
            true
        }
        None => false,
    }
}

fn sweep_expired(inner: &Mutex<CacheInner>) {
    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    let now = Instant::now();
    let expired: Vec<String> = inner
        .entries
        .iter()
        .filter(|(_, entry)| entry.expires_at <= now)
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        if let Some(entry) = inner.entries.pop(key) {
            inner.size_bytes -= entry.cost;
        }
    }
    if !expired.is_empty() {
        debug!(count = expired.len(), "swept expired cache entries");
    }
}

/// Cache key for a URL/selector pair. The selector only participates when
/// it scopes extraction to less than the whole page.
#[must_use]
pub fn cache_key(url: &str, selector: Option<&str>) -> String {
    match selector {
        None | Some("") | Some("body") => url.to_string(),
        Some(sel) => format!("{url}::{sel}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, html_len: usize) -> PageData {
        let mut data = PageData::new(url);
        data.html = "x".repeat(html_len);
        data
    }

    #[tokio::test]
    async fn get_returns_stored_entry() {
        let cache = MemoryCache::new(1024 * 1024, Duration::from_secs(60));
        cache.set("k", page("https://example.com", 100), None);

        let hit = cache.get("k").unwrap();
        assert_eq!(hit.url, "https://example.com");
        assert!(cache.get("missing").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn size_bound_evicts_least_recently_used() {
        // Room for two entries of ~1524 bytes each, not three.
        let cache = MemoryCache::new(3500, Duration::from_secs(60));
        cache.set("a", page("https://example.com/a", 500), None);
        cache.set("b", page("https://example.com/b", 500), None);

        // Touch "a" so "b" becomes the LRU victim.
        assert!(cache.get("a").is_some());
        cache.set("c", page("https://example.com/c", 500), None);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert!(cache.stats().size_bytes <= 3500);
    }

    #[tokio::test]
    async fn oversized_entry_is_refused() {
        let cache = MemoryCache::new(2048, Duration::from_secs(60));
        cache.set("big", page("https://example.com", 4096), None);
        assert!(cache.get("big").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = MemoryCache::new(1024 * 1024, Duration::from_secs(60));
        cache.set("k", page("https://example.com", 10), Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn delete_and_clear_release_accounted_size() {
        let cache = MemoryCache::new(1024 * 1024, Duration::from_secs(60));
        cache.set("a", page("https://example.com/a", 100), None);
        cache.set("b", page("https://example.com/b", 100), None);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));

        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().size_bytes, 0);
    }

    #[tokio::test]
    async fn clear_resets_counters_with_the_entries() {
        let cache = MemoryCache::new(1024 * 1024, Duration::from_secs(60));
        cache.set("a", page("https://example.com/a", 100), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("missing").is_none());

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn cache_key_includes_only_scoping_selectors() {
        assert_eq!(cache_key("https://e.com", None), "https://e.com");
        assert_eq!(cache_key("https://e.com", Some("body")), "https://e.com");
        assert_eq!(
            cache_key("https://e.com", Some("#main")),
            "https://e.com::#main"
        );
    }
}
