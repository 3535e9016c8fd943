//! Static HTTP fetch path.
//!
//! A shared keep-alive client issues a plain GET and hands the body to
//! the extraction module. Sessions are injected per request as `Cookie`
//! and extra headers rather than through the client's cookie store, so
//! one client can serve many sessions concurrently.

use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::errors::{EngineError, EngineResult};
use crate::extract;
use crate::models::{PageData, RequestOptions};
use crate::session::Session;

/// HTTP fetcher for pages that render server-side.
pub struct StaticScraper {
    client: Client,
    user_agent: String,
    default_timeout: Duration,
}

impl StaticScraper {
    /// Build the shared client. Timeouts are applied per request so the
    /// caller's `RequestOptions.timeout` can override the default.
    pub fn new(user_agent: &str, default_timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .build()
            .map_err(|e| EngineError::Other(anyhow::anyhow!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            default_timeout,
        })
    }

    /// Fetch `opts.url` and extract page data from the response body.
    pub async fn fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        validate_url(&opts.url)?;
        let start = Instant::now();
        let timeout = if opts.timeout.is_zero() {
            self.default_timeout
        } else {
            opts.timeout
        };

        // Per-request proxies need their own client; reqwest binds the
        // proxy at client construction.
        let client = match opts.proxy.as_deref() {
            Some(proxy_url) => {
                debug!(proxy = proxy_url, "building proxied client");
                let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                    EngineError::Validation(format!("invalid proxy URL {proxy_url:?}: {e}"))
                })?;
                Client::builder()
                    .proxy(proxy)
                    .connect_timeout(Duration::from_secs(10))
                    .gzip(true)
                    .build()
                    .map_err(|e| {
                        EngineError::Other(anyhow::anyhow!("failed to build proxied client: {e}"))
                    })?
            }
            None => self.client.clone(),
        };

        let mut request = client
            .get(&opts.url)
            .timeout(timeout)
            .header(reqwest::header::USER_AGENT, &self.user_agent);

        if let Some(session) = session {
            for (name, value) in &session.headers {
                request = request.header(name, value);
            }
            if !session.cookies.is_empty() {
                request = request.header(reqwest::header::COOKIE, session.cookie_header());
            }
        }
        // Caller headers win over session and defaults.
        for (name, value) in &opts.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest(&opts.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::UpstreamStatus {
                url: opts.url.clone(),
                status: status.as_u16(),
            });
        }

        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        let final_url = response.url().to_string();

        let body = response
            .text()
            .await
            .map_err(|e| EngineError::from_reqwest(&opts.url, e))?;

        let extracted = extract::extract_page(&body, &final_url, opts.effective_selector())?;

        let mut data = PageData::new(&opts.url);
        data.status_code = status.as_u16();
        data.headers = headers;
        data.title = extracted.title;
        data.content = extracted.content;
        data.metadata = extracted.metadata;
        data.links = extracted.links;
        data.images = extracted.images;
        data.scripts = extracted.scripts;
        data.html = body;

        if let Some(fields) = &opts.fields {
            match extract::extract_fields(&data.html, fields) {
                Ok(values) => data.metadata.extend(values),
                Err(e) => warn!(url = %opts.url, "field extraction failed: {e}"),
            }
        }

        data.response_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            url = %opts.url,
            status = data.status_code,
            ms = data.response_time_ms,
            "static fetch complete"
        );
        Ok(data)
    }
}

#[async_trait::async_trait]
impl super::Scraper for StaticScraper {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        StaticScraper::fetch(self, opts, session).await
    }
}

/// Reject URLs before any network or browser work happens.
pub(crate) fn validate_url(raw: &str) -> EngineResult<()> {
    let parsed =
        Url::parse(raw).map_err(|e| EngineError::Validation(format!("invalid URL {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(EngineError::Validation(format!(
            "unsupported URL scheme {other:?} in {raw:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_url_rejects_non_http_schemes() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com"),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_url("not a url"),
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn fetch_extracts_page_data() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"<html><head><title>Hi</title></head>
            <body><p>text</p><a href="/next">n</a></body></html>"#;
        let _m = server
            .mock("GET", "/page")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(body)
            .create_async()
            .await;

        let scraper = StaticScraper::new("test-agent", Duration::from_secs(5)).unwrap();
        let opts = RequestOptions::new(format!("{}/page", server.url()));
        let data = scraper.fetch(&opts, None).await.unwrap();

        assert_eq!(data.status_code, 200);
        assert_eq!(data.title, "Hi");
        assert_eq!(data.links.len(), 1);
        assert!(data.content.contains("text"));
    }

    #[tokio::test]
    async fn non_2xx_is_an_upstream_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/gone")
            .with_status(404)
            .create_async()
            .await;

        let scraper = StaticScraper::new("test-agent", Duration::from_secs(5)).unwrap();
        let opts = RequestOptions::new(format!("{}/gone", server.url()));
        let err = scraper.fetch(&opts, None).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }

    #[tokio::test]
    async fn session_cookies_and_headers_are_sent() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/auth")
            .match_header("cookie", "sid=abc")
            .match_header("x-token", "t1")
            .with_status(200)
            .with_body("<html><body>ok</body></html>")
            .create_async()
            .await;

        let mut session = Session::default();
        session.cookies.push(crate::session::SessionCookie {
            name: "sid".into(),
            value: "abc".into(),
            domain: String::new(),
            path: "/".into(),
            expires: 0,
            http_only: false,
            secure: false,
            same_site: String::new(),
        });
        session.headers.insert("x-token".into(), "t1".into());

        let scraper = StaticScraper::new("test-agent", Duration::from_secs(5)).unwrap();
        let opts = RequestOptions::new(format!("{}/auth", server.url()));
        let data = scraper.fetch(&opts, Some(&session)).await.unwrap();
        assert_eq!(data.status_code, 200);
    }
}
