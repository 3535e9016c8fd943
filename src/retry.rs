//! Exponential-backoff retry wrapper.
//!
//! Wraps any fallible async operation. Classification: errors carrying an
//! HTTP status retry only when that status is in the configured allowlist,
//! timeout-shaped errors always retry, everything else defaults to
//! retryable. Backoff sleeps are plain awaits, so dropping the returned
//! future (e.g. via an outer `tokio::time::timeout`) cancels the retry
//! loop immediately.

use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{EngineError, EngineResult};

/// Retry behavior configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// HTTP status codes that justify another attempt.
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Backoff before the attempt after `attempt` (0-indexed), capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(backoff.min(self.max_backoff.as_secs_f64()))
    }

    fn should_retry(&self, err: &EngineError) -> bool {
        if let Some(status) = err.status_code() {
            return self.retryable_status_codes.contains(&status);
        }
        if err.is_timeout() {
            return true;
        }
        // Validation and panics never recover on their own.
        !matches!(
            err,
            EngineError::Validation(_) | EngineError::WorkerPanic(_)
        )
    }
}

/// Execute `op` with retry according to `cfg`.
///
/// Returns the first success, the first non-retryable error, or
/// [`EngineError::RetriesExhausted`] after `max_attempts` failures.
pub async fn with_retry<T, F, Fut>(cfg: &RetryConfig, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let max_attempts = cfg.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..max_attempts {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "retry succeeded");
                }
                return Ok(value);
            }
            Err(err) => {
                if !cfg.should_retry(&err) {
                    debug!(error = %err, "error is not retryable");
                    return Err(err);
                }

                // The final attempt never sleeps afterward.
                if attempt < max_attempts - 1 {
                    let backoff = cfg.backoff_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_attempts,
                        ?backoff,
                        error = %err,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                last_err = Some(err);
            }
        }
    }

    let source = last_err.unwrap_or_else(|| {
        EngineError::Other(anyhow::anyhow!("retry loop exited without an error"))
    });
    warn!(attempts = max_attempts, error = %source, "max retry attempts exceeded");
    Err(EngineError::RetriesExhausted {
        attempts: max_attempts,
        source: Box::new(source),
    })
}
