//! Dynamic fetch path through a headless browser.
//!
//! Pages come from the pre-warmed pool; an acquire timeout means the
//! pool is exhausted and surfaces as an error. A scraper built without
//! a pool launches a dedicated browser per request and tears it down
//! afterward. Status and headers are captured from the CDP response
//! event whose URL matches the requested URL exactly, so a redirected
//! navigation reports defaults instead of the final response.

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, Headers, SetExtraHttpHeadersParams,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::browser::{BrowserPool, PoolOptions};
use crate::errors::{EngineError, EngineResult};
use crate::models::{PageData, RequestOptions};
use crate::session::Session;

use super::static_scraper::validate_url;

/// Delay after navigation for late DOM mutations to land.
const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// How long to wait for the matching response event after the page loads.
const RESPONSE_EVENT_GRACE: Duration = Duration::from_millis(250);

/// Browser-backed fetcher for JavaScript-rendered pages.
pub struct DynamicScraper {
    pool: Option<Arc<BrowserPool>>,
    pool_options: PoolOptions,
    default_timeout: Duration,
}

impl DynamicScraper {
    pub fn new(pool: Arc<BrowserPool>, pool_options: PoolOptions, default_timeout: Duration) -> Self {
        Self {
            pool: Some(pool),
            pool_options,
            default_timeout,
        }
    }

    /// Build a scraper with no pool. Every fetch launches its own
    /// browser, so this suits occasional one-off renders only.
    #[must_use]
    pub fn standalone(pool_options: PoolOptions, default_timeout: Duration) -> Self {
        Self {
            pool: None,
            pool_options,
            default_timeout,
        }
    }

    /// Render `opts.url` in a browser context and extract from the live DOM.
    ///
    /// With a pool, failing to acquire a context within the timeout is
    /// resource exhaustion and is returned as an error.
    pub async fn fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        validate_url(&opts.url)?;
        let timeout = if opts.timeout.is_zero() {
            self.default_timeout
        } else {
            opts.timeout
        };

        let Some(pool) = &self.pool else {
            return self.fetch_one_off(opts, session, timeout).await;
        };

        let ctx = pool.acquire(timeout).await?;
        let result =
            match tokio::time::timeout(timeout, fetch_on_page(ctx.page(), opts, session)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(timeout)),
            };
        pool.release(ctx).await;
        result
    }

    /// Single-use browser path for the pool-less configuration.
    async fn fetch_one_off(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
        timeout: Duration,
    ) -> EngineResult<PageData> {
        let (mut browser, handler, user_data_dir) = crate::browser::launch::launch_browser(
            self.pool_options.headless,
            &self.pool_options.user_agent,
        )
        .await?;

        let result = match browser.new_page("about:blank").await {
            Ok(page) => {
                let fetched =
                    match tokio::time::timeout(timeout, fetch_on_page(&page, opts, session)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::Timeout(timeout)),
                    };
                if let Err(e) = page.close().await {
                    debug!("error closing one-off page: {e}");
                }
                fetched
            }
            Err(e) => Err(EngineError::Browser(format!(
                "failed to open one-off page: {e}"
            ))),
        };

        if let Err(e) = browser.close().await {
            warn!("error closing one-off browser: {e}");
        }
        let _ = browser.wait().await;
        handler.abort();
        let _ = std::fs::remove_dir_all(&user_data_dir);
        result
    }
}

/// Navigate and extract on an already-acquired page.
async fn fetch_on_page(
    page: &Page,
    opts: &RequestOptions,
    session: Option<&Session>,
) -> EngineResult<PageData> {
    let start = Instant::now();

    inject_session(page, opts, session).await?;

    // Listen for the navigation response before navigating so the event
    // cannot race past us.
    let mut events = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| EngineError::Browser(format!("failed to install response listener: {e}")))?;
    let target_url = opts.url.clone();
    let mut capture = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if event.response.url == target_url {
                let headers = cdp_headers_to_map(&event.response.headers);
                return Some((event.response.status, headers));
            }
        }
        None
    });

    page.goto(opts.url.as_str())
        .await
        .map_err(|e| EngineError::Browser(format!("navigation to {} failed: {e}", opts.url)))?;

    tokio::time::sleep(SETTLE_DELAY).await;
    if let Some(extra) = opts.extra_wait {
        tokio::time::sleep(extra).await;
    }

    let mut data = PageData::new(&opts.url);

    data.title = page
        .get_title()
        .await
        .map_err(|e| EngineError::Browser(format!("failed to read title: {e}")))?
        .unwrap_or_default();
    data.html = page
        .content()
        .await
        .map_err(|e| EngineError::Browser(format!("failed to read page content: {e}")))?;

    data.links = eval_strings(
        page,
        "Array.from(document.querySelectorAll('a[href]')).map(a => a.href).filter(h => h)",
    )
    .await;
    data.images = eval_strings(
        page,
        "Array.from(document.querySelectorAll('img[src]')).map(i => i.src).filter(s => s)",
    )
    .await;
    data.scripts = eval_strings(
        page,
        "Array.from(document.querySelectorAll('script[src]')).map(s => s.src).filter(s => s)",
    )
    .await;
    data.metadata = eval_pairs(
        page,
        "Array.from(document.querySelectorAll('meta[name][content], meta[property][content]'))\
         .map(m => [m.getAttribute('name') || m.getAttribute('property'), m.getAttribute('content')])",
    )
    .await;

    data.content = match opts.effective_selector() {
        Some(sel) => {
            let quoted = js_quote(sel);
            let js = format!(
                "Array.from(document.querySelectorAll({quoted}))\
                 .map(e => e.innerText).join('\\n')"
            );
            let content = eval_string(page, &js).await;
            if content.is_empty() {
                warn!(selector = sel, url = %opts.url, "selector matched no elements");
            }
            content
        }
        None => eval_string(page, "document.body ? document.body.innerText : ''").await,
    };

    if let Some(fields) = &opts.fields {
        for (name, selector) in fields {
            let quoted = js_quote(selector);
            let js = format!(
                "(function() {{ const e = document.querySelector({quoted}); \
                 return e ? e.innerText : ''; }})()"
            );
            let value = eval_string(page, &js).await;
            data.metadata.insert(name.clone(), value);
        }
    }

    // The response event normally arrived during navigation; give it a
    // short grace period, then fall back to defaults.
    match tokio::time::timeout(RESPONSE_EVENT_GRACE, &mut capture).await {
        Ok(Ok(Some((status, headers)))) => {
            data.status_code = u16::try_from(status).unwrap_or(200);
            data.headers = headers;
        }
        _ => {
            capture.abort();
            debug!(url = %opts.url, "no response event matched the request URL exactly");
            data.status_code = 200;
        }
    }

    data.response_time_ms = start.elapsed().as_millis() as u64;
    debug!(
        url = %opts.url,
        status = data.status_code,
        ms = data.response_time_ms,
        "dynamic fetch complete"
    );
    Ok(data)
}

/// Apply session cookies and merged extra headers to the page before
/// navigation.
async fn inject_session(
    page: &Page,
    opts: &RequestOptions,
    session: Option<&Session>,
) -> EngineResult<()> {
    let mut extra_headers: HashMap<&str, &str> = HashMap::new();
    if let Some(session) = session {
        for (name, value) in &session.headers {
            extra_headers.insert(name, value);
        }

        if !session.cookies.is_empty() {
            let mut params = Vec::with_capacity(session.cookies.len());
            for cookie in &session.cookies {
                let mut builder = CookieParam::builder()
                    .name(cookie.name.clone())
                    .value(cookie.value.clone());
                if cookie.domain.is_empty() {
                    builder = builder.url(opts.url.clone());
                } else {
                    builder = builder.domain(cookie.domain.clone());
                    if !cookie.path.is_empty() {
                        builder = builder.path(cookie.path.clone());
                    }
                }
                let param = builder.build().map_err(EngineError::Session)?;
                params.push(param);
            }
            page.set_cookies(params)
                .await
                .map_err(|e| EngineError::Browser(format!("failed to set cookies: {e}")))?;
        }
    }
    for (name, value) in &opts.headers {
        extra_headers.insert(name, value);
    }

    if !extra_headers.is_empty() {
        let headers = Headers::new(serde_json::json!(extra_headers));
        page.execute(SetExtraHttpHeadersParams::new(headers))
            .await
            .map_err(|e| EngineError::Browser(format!("failed to set extra headers: {e}")))?;
    }
    Ok(())
}

async fn eval_strings(page: &Page, js: &str) -> Vec<String> {
    match page.evaluate(js).await {
        Ok(result) => result.into_value().unwrap_or_default(),
        Err(e) => {
            debug!("evaluation failed: {e}");
            Vec::new()
        }
    }
}

async fn eval_string(page: &Page, js: &str) -> String {
    match page.evaluate(js).await {
        Ok(result) => result.into_value().unwrap_or_default(),
        Err(e) => {
            debug!("evaluation failed: {e}");
            String::new()
        }
    }
}

async fn eval_pairs(page: &Page, js: &str) -> HashMap<String, String> {
    match page.evaluate(js).await {
        Ok(result) => result
            .into_value::<Vec<(String, String)>>()
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default(),
        Err(e) => {
            debug!("evaluation failed: {e}");
            HashMap::new()
        }
    }
}

fn cdp_headers_to_map(headers: &Headers) -> HashMap<String, String> {
    headers
        .inner()
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(name, value)| {
                    let value = value
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| value.to_string());
                    (name.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl super::Scraper for DynamicScraper {
    fn name(&self) -> &'static str {
        "dynamic"
    }

    async fn fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        DynamicScraper::fetch(self, opts, session).await
    }
}

/// Quote a string as a JS string literal.
fn js_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn standalone_scraper_validates_before_launching_anything() {
        let scraper = DynamicScraper::standalone(PoolOptions::default(), Duration::from_secs(1));
        assert!(scraper.pool.is_none());

        let err = scraper
            .fetch(&RequestOptions::new("ftp://example.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn js_quote_escapes_quotes() {
        assert_eq!(js_quote("#main"), "\"#main\"");
        assert_eq!(js_quote("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn cdp_headers_convert_to_string_map() {
        let headers = Headers::new(serde_json::json!({
            "content-type": "text/html",
            "x-count": 3,
        }));
        let map = cdp_headers_to_map(&headers);
        assert_eq!(map.get("content-type").unwrap(), "text/html");
        assert_eq!(map.get("x-count").unwrap(), "3");
    }
}
