//! Round-robin proxy pool with failure tracking.
//!
//! Proxies rotate in insertion order. A proxy marked failed is skipped
//! until its cooldown elapses, after which it is tried again. When every
//! proxy is failed the pool still returns the next one in order so
//! callers degrade instead of stalling.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

struct ProxyEntry {
    url: String,
    failed_at: Option<Instant>,
}

struct PoolInner {
    proxies: Vec<ProxyEntry>,
    next: usize,
}

/// Rotating set of upstream proxies.
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
    cooldown: Duration,
}

impl ProxyPool {
    /// Build a pool over `proxies` in rotation order with the default
    /// five-minute failure cooldown.
    #[must_use]
    pub fn new(proxies: Vec<String>) -> Self {
        Self::with_cooldown(proxies, DEFAULT_COOLDOWN)
    }

    #[must_use]
    pub fn with_cooldown(proxies: Vec<String>, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                proxies: proxies
                    .into_iter()
                    .map(|url| ProxyEntry {
                        url,
                        failed_at: None,
                    })
                    .collect(),
                next: 0,
            }),
            cooldown,
        }
    }

    /// The next healthy proxy in rotation, or `None` for an empty pool.
    ///
    /// Failed proxies past their cooldown are considered healthy again.
    /// If the full cycle is failed, the next proxy is returned anyway.
    #[must_use]
    pub fn get_next(&self) -> Option<String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let count = inner.proxies.len();
        if count == 0 {
            return None;
        }

        let now = Instant::now();
        for _ in 0..count {
            let idx = inner.next;
            inner.next = (inner.next + 1) % count;

            let entry = &mut inner.proxies[idx];
            match entry.failed_at {
                Some(at) if now.duration_since(at) < self.cooldown => continue,
                Some(_) => {
                    debug!(proxy = %entry.url, "proxy cooldown elapsed, retrying");
                    entry.failed_at = None;
                }
                None => {}
            }
            return Some(entry.url.clone());
        }

        // Every proxy is in cooldown; hand out the next one regardless.
        let idx = inner.next;
        inner.next = (inner.next + 1) % count;
        let url = inner.proxies[idx].url.clone();
        warn!(proxy = %url, "all proxies failed, reusing despite cooldown");
        Some(url)
    }

    /// Record a failure for `url`, taking it out of rotation until the
    /// cooldown elapses. Unknown URLs are ignored.
    pub fn mark_failed(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.proxies.iter_mut().find(|p| p.url == url) {
            entry.failed_at = Some(Instant::now());
        }
    }

    /// Clear the failure state of `url` immediately.
    pub fn mark_healthy(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.proxies.iter_mut().find(|p| p.url == url) {
            entry.failed_at = None;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .proxies
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ProxyPool {
        ProxyPool::new(vec![
            "http://proxy-a:8080".into(),
            "http://proxy-b:8080".into(),
            "http://proxy-c:8080".into(),
        ])
    }

    #[test]
    fn rotates_in_insertion_order() {
        let pool = pool();
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-a:8080"));
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-b:8080"));
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-c:8080"));
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-a:8080"));
    }

    #[test]
    fn failed_proxy_is_skipped() {
        let pool = pool();
        pool.mark_failed("http://proxy-a:8080");
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-b:8080"));
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-c:8080"));
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-b:8080"));
    }

    #[test]
    fn mark_healthy_restores_rotation() {
        let pool = pool();
        pool.mark_failed("http://proxy-b:8080");
        pool.mark_healthy("http://proxy-b:8080");
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-a:8080"));
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-b:8080"));
    }

    #[test]
    fn all_failed_still_returns_a_proxy() {
        let pool = pool();
        pool.mark_failed("http://proxy-a:8080");
        pool.mark_failed("http://proxy-b:8080");
        pool.mark_failed("http://proxy-c:8080");
        assert!(pool.get_next().is_some());
    }

    #[test]
    fn cooldown_elapsed_proxy_recovers() {
        let pool = ProxyPool::with_cooldown(
            vec!["http://proxy-a:8080".into()],
            Duration::from_millis(0),
        );
        pool.mark_failed("http://proxy-a:8080");
        assert_eq!(pool.get_next().as_deref(), Some("http://proxy-a:8080"));
    }

    #[test]
    fn empty_pool_returns_none() {
        let pool = ProxyPool::new(Vec::new());
        assert!(pool.get_next().is_none());
        assert!(pool.is_empty());
    }
}
