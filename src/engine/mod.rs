//! Engine facade: mode dispatch, caching, rate limiting, and retry.
//!
//! Every collaborator is owned by the engine and injected at
//! construction; there is no global state. The browser pool is expensive
//! and many workloads never need it, so it is built lazily on the first
//! request that requires rendering, exactly once even under concurrent
//! first use.

pub mod dynamic;
pub mod hybrid;
pub mod static_scraper;
pub mod strategy;

pub use dynamic::DynamicScraper;
pub use hybrid::HybridScraper;
pub use static_scraper::StaticScraper;
pub use strategy::{Strategy, determine_strategy};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::browser::{BrowserPool, PoolOptions};
use crate::cache::{CacheStats, MemoryCache, cache_key};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::models::{PageData, RequestOptions, ScraperMode};
use crate::proxy::ProxyPool;
use crate::ratelimit::DomainLimiter;
use crate::retry::{RetryConfig, with_retry};
use crate::session::{Session, SessionStore};

/// Common interface of the three fetch paths, for callers that hold a
/// fetcher without caring which mode backs it.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Short mode name for logging.
    fn name(&self) -> &'static str;

    /// Fetch one page.
    async fn fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData>;
}

/// The hybrid scraping engine.
pub struct Engine {
    config: EngineConfig,
    cache: MemoryCache,
    limiter: DomainLimiter,
    statics: StaticScraper,
    retry: RetryConfig,
    browser_pool: OnceCell<Arc<BrowserPool>>,
    session_store: Option<Arc<dyn SessionStore>>,
    proxies: Option<ProxyPool>,
}

impl Engine {
    /// Build an engine from config. No browser is launched yet.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let statics = StaticScraper::new(&config.user_agent, config.http_timeout)?;
        let cache = MemoryCache::new(config.cache_max_size_bytes, config.cache_ttl);
        let limiter = DomainLimiter::new(config.rate_limit_rps, config.rate_limit_burst);
        Ok(Self {
            config,
            cache,
            limiter,
            statics,
            retry: RetryConfig::default(),
            browser_pool: OnceCell::new(),
            session_store: None,
            proxies: None,
        })
    }

    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Rotate outgoing requests across `proxies` instead of using the
    /// single configured proxy.
    #[must_use]
    pub fn with_proxies(mut self, proxies: Vec<String>) -> Self {
        self.proxies = Some(ProxyPool::new(proxies));
        self
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Scrape one URL according to its requested mode.
    ///
    /// Checks the cache first; a fresh result is stored back with the
    /// configured TTL. Each retry attempt waits on the domain limiter.
    pub async fn scrape(&self, opts: RequestOptions) -> EngineResult<PageData> {
        static_scraper::validate_url(&opts.url)?;

        let key = cache_key(&opts.url, opts.effective_selector());
        if let Some(hit) = self.cache.get(&key) {
            debug!(url = %opts.url, "serving from cache");
            return Ok(hit);
        }

        let session = match &opts.session_name {
            Some(name) => Some(self.load_session(name).await?),
            None => None,
        };

        let mut opts = opts;
        let rotated_proxy = if opts.proxy.is_none() {
            match (&self.proxies, &self.config.proxy) {
                (Some(pool), _) => {
                    opts.proxy = pool.get_next();
                    opts.proxy.clone()
                }
                (None, Some(proxy)) => {
                    opts.proxy = Some(proxy.clone());
                    None
                }
                (None, None) => None,
            }
        } else {
            None
        };

        let result = with_retry(&self.retry, || self.dispatch(&opts, session.as_ref())).await;

        if let (Some(pool), Some(proxy)) = (&self.proxies, &rotated_proxy) {
            match &result {
                Ok(_) => pool.mark_healthy(proxy),
                Err(e) if matches!(e, EngineError::Network { .. }) || e.is_timeout() => {
                    warn!(proxy, "marking proxy failed: {e}");
                    pool.mark_failed(proxy);
                }
                Err(_) => {}
            }
        }

        let data = result?;
        self.cache.set(&key, data.clone(), Some(self.config.cache_ttl));
        Ok(data)
    }

    async fn dispatch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        self.limiter.wait(&opts.url).await;

        match opts.mode {
            ScraperMode::Static => self.statics.fetch(opts, session).await,
            ScraperMode::Spa => self.dynamic_fetch(opts, session).await,
            ScraperMode::Auto => self.auto_fetch(opts, session).await,
        }
    }

    /// Probe with a static fetch and upgrade when the page needs it.
    async fn auto_fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        let mut data = match self.statics.fetch(opts, session).await {
            Ok(data) => data,
            Err(e @ EngineError::Validation(_)) => return Err(e),
            Err(e) => {
                debug!(url = %opts.url, "static probe failed, trying browser: {e}");
                return self.dynamic_fetch(opts, session).await;
            }
        };

        match determine_strategy(&data.html)? {
            Strategy::Static => Ok(data),
            Strategy::Hybrid => {
                debug!(url = %opts.url, "running inline scripts in sandbox");
                hybrid::apply_inline_scripts(&mut data);
                Ok(data)
            }
            Strategy::Dynamic => {
                debug!(url = %opts.url, "page needs rendering, using browser");
                self.dynamic_fetch(opts, session).await
            }
        }
    }

    async fn dynamic_fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        let pool = self.browser_pool().await?;
        let scraper = DynamicScraper::new(
            Arc::clone(pool),
            self.pool_options(),
            self.config.http_timeout,
        );
        scraper.fetch(opts, session).await
    }

    /// The shared browser pool, built on first use.
    async fn browser_pool(&self) -> EngineResult<&Arc<BrowserPool>> {
        self.browser_pool
            .get_or_try_init(|| async {
                info!("launching browser pool on first dynamic request");
                BrowserPool::new(self.pool_options()).await
            })
            .await
    }

    fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            size: self.config.browser_pool_size,
            headless: self.config.headless,
            user_agent: self.config.user_agent.clone(),
        }
    }

    async fn load_session(&self, name: &str) -> EngineResult<Session> {
        match &self.session_store {
            Some(store) => store.load_session(name).await,
            None => Err(EngineError::Session(format!(
                "no session store configured, cannot load {name:?}"
            ))),
        }
    }

    /// Override the rate limit for one domain.
    pub fn set_domain_limit(&self, domain: &str, requests_per_second: f64, burst: u32) {
        self.limiter.set_limit(domain, requests_per_second, burst);
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop cached results without touching the pools.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Shut down background tasks and the browser pool, if one was built.
    pub async fn close(&self) {
        self.cache.close();
        if let Some(pool) = self.browser_pool.get() {
            pool.close().await;
        }
        info!("engine closed");
    }
}
