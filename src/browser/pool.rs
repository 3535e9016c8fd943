//! Fixed-size pool of pre-warmed browser contexts.
//!
//! One shared browser process owns every context; each context is a tab
//! parked on about:blank. Contexts circulate through a bounded channel:
//! acquire takes one out (with a deadline), release resets and returns
//! it. A context is not health-checked on release, so a tab that crashed
//! mid-request goes back into rotation and fails its next acquire-use.

use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, EngineResult};

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of contexts to warm, clamped to 1-10.
    pub size: usize,
    pub headless: bool,
    pub user_agent: String,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            size: 3,
            headless: true,
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// One pooled tab, identified for logging.
pub struct BrowserContext {
    pub(crate) id: usize,
    pub(crate) page: Page,
}

impl BrowserContext {
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn teardown(self) {
        let id = self.id;
        if let Err(e) = self.page.close().await {
            debug!(context = id, "error closing browser context: {e}");
        }
    }
}

/// Pool of warm browser contexts over one shared browser process.
pub struct BrowserPool {
    browser: Mutex<Browser>,
    handler: std::sync::Mutex<Option<JoinHandle<()>>>,
    user_data_dir: PathBuf,
    tx: mpsc::Sender<BrowserContext>,
    rx: Mutex<mpsc::Receiver<BrowserContext>>,
    size: usize,
    available: AtomicUsize,
    closed: AtomicBool,
}

impl BrowserPool {
    /// Launch the browser and warm the configured number of contexts.
    ///
    /// Fails fast: if any context cannot be created, everything launched
    /// so far is torn down and the error returned.
    pub async fn new(options: PoolOptions) -> EngineResult<Arc<Self>> {
        let size = options.size.clamp(1, 10);
        let (browser, handler, user_data_dir) =
            super::launch::launch_browser(options.headless, &options.user_agent).await?;

        let (tx, rx) = mpsc::channel(size);
        let mut warmed: Vec<BrowserContext> = Vec::with_capacity(size);

        for id in 0..size {
            match browser.new_page("about:blank").await {
                Ok(page) => warmed.push(BrowserContext { id, page }),
                Err(e) => {
                    for ctx in warmed {
                        ctx.teardown().await;
                    }
                    let mut browser = browser;
                    if let Err(close_err) = browser.close().await {
                        warn!("error closing browser after failed warm-up: {close_err}");
                    }
                    let _ = browser.wait().await;
                    handler.abort();
                    let _ = std::fs::remove_dir_all(&user_data_dir);
                    return Err(EngineError::Browser(format!(
                        "failed to warm browser context {id}: {e}"
                    )));
                }
            }
        }

        for ctx in warmed {
            // Cannot fail: the channel holds exactly `size` slots.
            if let Err(e) = tx.try_send(ctx) {
                warn!("failed to seed context channel: {e}");
            }
        }

        info!(size, "browser pool ready");
        Ok(Arc::new(Self {
            browser: Mutex::new(browser),
            handler: std::sync::Mutex::new(Some(handler)),
            user_data_dir,
            tx,
            rx: Mutex::new(rx),
            size,
            available: AtomicUsize::new(size),
            closed: AtomicBool::new(false),
        }))
    }

    /// Take a context out of the pool, waiting up to `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> EngineResult<BrowserContext> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::BrowserPool("pool is closed".into()));
        }

        let ctx = {
            let mut rx = self.rx.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(ctx)) => ctx,
                Ok(None) => {
                    return Err(EngineError::BrowserPool("pool is closed".into()));
                }
                Err(_) => {
                    return Err(EngineError::BrowserPool(format!(
                        "no browser context available within {timeout:?}"
                    )));
                }
            }
        };

        // The pool may have closed while we waited; do not hand out a
        // context backed by a dying browser.
        if self.closed.load(Ordering::SeqCst) {
            ctx.teardown().await;
            return Err(EngineError::BrowserPool("pool is closed".into()));
        }

        self.available.fetch_sub(1, Ordering::SeqCst);
        debug!(context = ctx.id, "acquired browser context");
        Ok(ctx)
    }

    /// Return a context to the pool, resetting it to about:blank first.
    ///
    /// The reset is best-effort; a context whose tab has crashed still
    /// goes back into rotation. Contexts that cannot be returned (pool
    /// closed or already full) are torn down instead.
    pub async fn release(&self, ctx: BrowserContext) {
        if self.closed.load(Ordering::SeqCst) {
            ctx.teardown().await;
            return;
        }

        if let Err(e) = ctx.page.goto("about:blank").await {
            warn!(context = ctx.id, "failed to reset context: {e}");
        }

        let id = ctx.id;
        match self.tx.try_send(ctx) {
            Ok(()) => {
                self.available.fetch_add(1, Ordering::SeqCst);
                debug!(context = id, "released browser context");
            }
            Err(mpsc::error::TrySendError::Full(ctx))
            | Err(mpsc::error::TrySendError::Closed(ctx)) => {
                warn!(context = id, "pool full or closed, discarding context");
                ctx.teardown().await;
            }
        }
    }

    /// Shut the pool down: close every context and the browser process.
    /// Idempotent; concurrent acquires fail once the flag is set.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing browser pool");

        {
            let mut rx = self.rx.lock().await;
            rx.close();
            while let Ok(ctx) = rx.try_recv() {
                ctx.teardown().await;
            }
        }
        self.available.store(0, Ordering::SeqCst);

        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("error closing browser: {e}");
            }
            let _ = browser.wait().await;
        }

        if let Some(handler) = self
            .handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handler.abort();
        }

        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            debug!(
                "failed to remove user data dir {}: {e}",
                self.user_data_dir.display()
            );
        }
    }

    /// Configured pool size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Contexts currently parked in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
