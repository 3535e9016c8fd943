//! Engine configuration.
//!
//! A single explicit config value is threaded into every component
//! constructor; there is no package-level mutable state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default User-Agent sent by both fetch paths.
pub const DEFAULT_USER_AGENT: &str = "webgrab/0.3 (+https://github.com/law-makers/webgrab)";

/// Configuration for the scraping engine and its resource pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default per-request timeout when `RequestOptions.timeout` is zero.
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,
    /// Number of pre-warmed browser contexts (clamped to 1-10 by the pool).
    pub browser_pool_size: usize,
    /// Run the browser headless.
    pub headless: bool,
    /// Default requests per second per host.
    pub rate_limit_rps: f64,
    /// Default burst capacity per host.
    pub rate_limit_burst: u32,
    /// Maximum accounted cache size in bytes.
    pub cache_max_size_bytes: u64,
    /// TTL applied when storing fetch results in the cache.
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
    /// User-Agent header for HTTP requests and the browser.
    pub user_agent: String,
    /// Worker count for batch operations; 0 auto-tunes from CPU count.
    pub worker_count: usize,
    /// Proxy URL applied to every request unless overridden per request.
    pub proxy: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            browser_pool_size: 3,
            headless: true,
            rate_limit_rps: 5.0,
            rate_limit_burst: 10,
            cache_max_size_bytes: 100 * 1024 * 1024,
            cache_ttl: Duration::from_secs(300),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            worker_count: 0,
            proxy: None,
        }
    }
}

impl EngineConfig {
    /// Effective worker count: configured value, or 3x CPU count capped at
    /// 50 when set to 0 (I/O-bound work benefits from oversubscription).
    #[must_use]
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count.min(50);
        }
        (num_cpus::get() * 3).clamp(num_cpus::get(), 50)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_capped() {
        let cfg = EngineConfig {
            worker_count: 500,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.effective_worker_count(), 50);
    }

    #[test]
    fn worker_count_auto_tunes_when_zero() {
        let cfg = EngineConfig::default();
        let n = cfg.effective_worker_count();
        assert!(n >= 1 && n <= 50);
    }
}
