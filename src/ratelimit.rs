//! Per-host token-bucket rate limiter.
//!
//! Buckets are created lazily with the configured default rate/burst and
//! live for the lifetime of the limiter. The bucket map takes a read lock
//! for the common case and upgrades to a write lock only to create a new
//! bucket, double-checking after the upgrade to avoid duplicate creation
//! under a race. No lock is ever held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::trace;
use url::Url;

/// Per-host rate limiter. Requests to hosts that cannot be parsed out of a
/// URL pass through unconditionally; validation happens downstream.
pub struct DomainLimiter {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    default_rps: f64,
    default_burst: u32,
}

impl DomainLimiter {
    /// Create a limiter with per-host defaults. Non-positive values fall
    /// back to 5 rps / burst 10.
    #[must_use]
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let rps = if requests_per_second > 0.0 {
            requests_per_second
        } else {
            5.0
        };
        let burst = if burst > 0 { burst } else { 10 };
        Self {
            buckets: RwLock::new(HashMap::new()),
            default_rps: rps,
            default_burst: burst,
        }
    }

    /// Block until a token is available for the URL's host.
    ///
    /// Cancellation: dropping the returned future (for example via an
    /// outer `tokio::time::timeout`) abandons the wait without consuming
    /// a token.
    pub async fn wait(&self, url: &str) {
        let Some(host) = extract_host(url) else {
            return;
        };
        let bucket = self.bucket_for(&host);
        loop {
            match bucket.try_take() {
                None => return,
                Some(delay) => {
                    trace!(%host, ?delay, "rate limited, waiting for token");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Non-blocking check: consume a token if one is immediately available.
    #[must_use]
    pub fn allow(&self, url: &str) -> bool {
        let Some(host) = extract_host(url) else {
            return true;
        };
        self.bucket_for(&host).try_take().is_none()
    }

    /// Reserve the next token, reporting the delay until it is usable.
    /// The reservation can be cancelled to return the token.
    #[must_use]
    pub fn reserve(&self, url: &str) -> Reservation {
        let Some(host) = extract_host(url) else {
            return Reservation {
                delay: Duration::ZERO,
                bucket: None,
            };
        };
        let bucket = self.bucket_for(&host);
        let delay = bucket.take_with_debt();
        Reservation {
            delay,
            bucket: Some(bucket),
        }
    }

    /// Update or create a host's rate/burst. The bucket restarts with a
    /// full burst under the new limit.
    pub fn set_limit(&self, domain: &str, requests_per_second: f64, burst: u32) {
        let bucket = self.bucket_for(domain);
        bucket.set_limit(requests_per_second, burst);
    }

    fn bucket_for(&self, host: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(host)
        {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        // Double-check after acquiring the write lock.
        if let Some(bucket) = buckets.get(host) {
            return Arc::clone(bucket);
        }
        let bucket = Arc::new(TokenBucket::new(self.default_rps, self.default_burst));
        buckets.insert(host.to_string(), bucket.clone());
        bucket
    }
}

/// A committed-or-cancellable claim on the next token of one bucket.
pub struct Reservation {
    delay: Duration,
    bucket: Option<Arc<TokenBucket>>,
}

impl Reservation {
    /// How long the caller must wait before acting on the reservation.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Give the token back instead of using it.
    pub fn cancel(mut self) {
        if let Some(bucket) = self.bucket.take() {
            bucket.return_token();
        }
    }
}

/// Token bucket guarding one host.
struct TokenBucket {
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    rate: f64,
    burst: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                rate,
                burst: f64::from(burst),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.refill();
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64(
                (1.0 - state.tokens) / state.rate.max(f64::MIN_POSITIVE),
            ))
        }
    }

    /// Take one token unconditionally (tokens may go negative), returning
    /// the delay until the claim is covered by refill.
    fn take_with_debt(&self) -> Duration {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.refill();
        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / state.rate.max(f64::MIN_POSITIVE))
        }
    }

    fn return_token(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tokens = (state.tokens + 1.0).min(state.burst);
    }

    fn set_limit(&self, rate: f64, burst: u32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.rate = rate.max(f64::MIN_POSITIVE);
        state.burst = f64::from(burst.max(1));
        state.tokens = state.burst;
        state.last_refill = Instant::now();
    }
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }
}

/// Extract the host component from a URL string.
fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
