//! Engine error taxonomy.
//!
//! Errors are classified so the retry layer can decide whether another
//! attempt is worthwhile: upstream status codes consult a configured
//! allowlist, timeouts always retry, validation never does.

use std::time::Duration;
use thiserror::Error;

/// Error type shared by every fetch path and the batch/download pools.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad URL or selector, rejected before any network activity.
    #[error("validation error: {0}")]
    Validation(String),

    /// Connection-level failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Non-2xx HTTP response.
    #[error("HTTP {status} from {url}")]
    UpstreamStatus { url: String, status: u16 },

    /// Browser pool exhausted or the pool has been closed.
    #[error("browser pool: {0}")]
    BrowserPool(String),

    /// Headless browser protocol failure (navigation, CDP, crash).
    #[error("browser error: {0}")]
    Browser(String),

    /// Malformed HTML or a selector that could not be compiled.
    #[error("parse error: {0}")]
    Parse(String),

    /// A worker panicked while executing a job.
    #[error("worker panic: {0}")]
    WorkerPanic(String),

    /// Named session missing or expired.
    #[error("session error: {0}")]
    Session(String),

    /// All retry attempts exhausted.
    #[error("operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// The HTTP status code carried by this error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UpstreamStatus { status, .. } => Some(*status),
            Self::Network { source, .. } => source.status().map(|s| s.as_u16()),
            Self::RetriesExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// Whether this error is timeout-shaped.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Network { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Convert a reqwest error for `url`, preserving timeout shape.
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else {
            Self::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;
