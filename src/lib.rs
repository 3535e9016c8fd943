//! Hybrid web scraping engine.
//!
//! Three fetch paths share one result shape: a plain HTTP GET for
//! server-rendered pages, a headless browser (through a pre-warmed
//! context pool) for client-rendered ones, and a hybrid middle ground
//! that runs a page's inline scripts in an embedded sandbox. Auto mode
//! probes the static HTML and picks the cheapest path that works.
//!
//! The [`Engine`] facade wires the paths together with a per-domain rate
//! limiter, a size-bounded response cache, retry with exponential
//! backoff, and optional proxy rotation and session injection. Batch
//! work goes through [`BatchScraper`], bulk downloads through
//! [`DownloadPool`].
//!
//! ```no_run
//! use webgrab::{Engine, EngineConfig, RequestOptions};
//!
//! # async fn run() -> Result<(), webgrab::EngineError> {
//! let engine = Engine::new(EngineConfig::default())?;
//! let page = engine
//!     .scrape(RequestOptions::new("https://example.com"))
//!     .await?;
//! println!("{} ({} links)", page.title, page.links.len());
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod browser;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod models;
pub mod proxy;
pub mod ratelimit;
pub mod retry;
pub mod session;

pub use batch::BatchScraper;
pub use browser::{BrowserContext, BrowserPool, PoolOptions};
pub use cache::{CacheStats, MemoryCache, cache_key};
pub use config::{DEFAULT_USER_AGENT, EngineConfig};
pub use downloader::{DownloadOutcome, DownloadPool, DownloadResult, Downloader};
pub use engine::{
    DynamicScraper, Engine, HybridScraper, Scraper, StaticScraper, Strategy, determine_strategy,
};
pub use errors::{EngineError, EngineResult};
pub use models::{PageData, RequestOptions, ScrapeResult, ScraperMode};
pub use proxy::ProxyPool;
pub use ratelimit::{DomainLimiter, Reservation};
pub use retry::{RetryConfig, with_retry};
pub use session::{MemorySessionStore, Session, SessionCookie, SessionStore};
