//! Streaming asset downloads.
//!
//! Bodies are streamed to disk chunk by chunk, never buffered whole in
//! memory. Filenames come from the URL path, sanitized for the local
//! filesystem. Transient failures go through the shared retry policy,
//! and every attempt waits on a per-host rate limiter first.

pub mod pool;

pub use pool::DownloadPool;

use futures_util::StreamExt;
use log::debug;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::errors::{EngineError, EngineResult};
use crate::ratelimit::DomainLimiter;
use crate::retry::{RetryConfig, with_retry};

/// Outcome of a completed download.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub url: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_ms: u64,
}

/// Result record delivered per job by [`DownloadPool`].
#[derive(Debug)]
pub struct DownloadOutcome {
    pub url: String,
    pub result: EngineResult<DownloadResult>,
}

/// HTTP downloader with retry and per-host rate limiting.
pub struct Downloader {
    client: Client,
    user_agent: String,
    retry: RetryConfig,
    limiter: Arc<DomainLimiter>,
}

impl Downloader {
    pub fn new(user_agent: &str) -> EngineResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                EngineError::Other(anyhow::anyhow!("failed to build download client: {e}"))
            })?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            retry: RetryConfig::default(),
            limiter: Arc::new(DomainLimiter::new(5.0, 10)),
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Share a rate limiter with other components instead of the
    /// downloader's own 5 rps / burst 10 default.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<DomainLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Download `url` into `dest_dir`, deriving the filename from the URL
    /// path. Existing files are overwritten.
    pub async fn download(&self, url: &str, dest_dir: &Path) -> EngineResult<DownloadResult> {
        crate::engine::static_scraper::validate_url(url)?;
        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| {
            EngineError::Other(anyhow::anyhow!(
                "failed to create {}: {e}",
                dest_dir.display()
            ))
        })?;

        let path = dest_dir.join(filename_for(url));
        with_retry(&self.retry, || self.try_download(url, &path)).await
    }

    async fn try_download(&self, url: &str, path: &Path) -> EngineResult<DownloadResult> {
        self.limiter.wait(url).await;
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(path).await.map_err(|e| {
            EngineError::Other(anyhow::anyhow!("failed to create {}: {e}", path.display()))
        })?;

        let mut size_bytes = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| EngineError::from_reqwest(url, e))?;
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| {
                EngineError::Other(anyhow::anyhow!("failed to write {}: {e}", path.display()))
            })?;
        }
        file.flush().await.map_err(|e| {
            EngineError::Other(anyhow::anyhow!("failed to flush {}: {e}", path.display()))
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!("downloaded {url} ({size_bytes} bytes in {duration_ms} ms)");
        Ok(DownloadResult {
            url: url.to_string(),
            path: path.to_path_buf(),
            size_bytes,
            duration_ms,
        })
    }
}

/// Derive a safe local filename from the URL's last path segment.
fn filename_for(url: &str) -> String {
    let candidate = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "download".to_string());
    let sanitized = sanitize_filename::sanitize(&candidate);
    if sanitized.is_empty() {
        "download".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_comes_from_last_path_segment() {
        assert_eq!(filename_for("https://e.com/a/b/photo.jpg"), "photo.jpg");
        assert_eq!(filename_for("https://e.com/"), "download");
        assert_eq!(filename_for("https://e.com/a.png?q=1"), "a.png");
        assert_eq!(filename_for("not a url"), "download");
    }

    #[tokio::test]
    async fn download_streams_body_to_disk() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/file.bin")
            .with_status(200)
            .with_body(vec![7u8; 4096])
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new("test-agent").unwrap();
        let result = downloader
            .download(&format!("{}/file.bin", server.url()), dir.path())
            .await
            .unwrap();

        assert_eq!(result.size_bytes, 4096);
        assert_eq!(result.path, dir.path().join("file.bin"));
        assert_eq!(std::fs::metadata(&result.path).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn non_2xx_download_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new("test-agent").unwrap();
        let err = downloader
            .download(&format!("{}/missing", server.url()), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }
}
