//! Concurrent batch scraping over a bounded worker pool.
//!
//! Jobs are interleaved across hosts so one slow domain does not
//! monopolize the queue, then pulled by a fixed set of workers. Each job
//! is isolated with `catch_unwind`: a panicking job produces a failed
//! result instead of killing its worker, so every submitted request
//! yields exactly one result. Results arrive in completion order.
//! Dropping the receiver cancels the batch; workers stop as soon as a
//! result send fails.

use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::engine::Engine;
use crate::errors::{EngineError, EngineResult};
use crate::models::{PageData, RequestOptions, ScrapeResult};

const MAX_WORKERS: usize = 50;

/// Batch front-end over a shared [`Engine`].
pub struct BatchScraper {
    engine: Arc<Engine>,
    workers: usize,
}

impl BatchScraper {
    /// Worker count comes from the engine config unless overridden with
    /// [`with_workers`](Self::with_workers).
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, workers: 0 }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Scrape every request concurrently, returning a channel of results.
    ///
    /// The channel holds one slot per request, closes when all jobs have
    /// finished, and delivers exactly `requests.len()` results.
    pub async fn scrape_batch(
        &self,
        requests: Vec<RequestOptions>,
    ) -> mpsc::Receiver<ScrapeResult> {
        let workers = if self.workers > 0 {
            self.workers.min(MAX_WORKERS)
        } else {
            self.engine.config().effective_worker_count()
        };
        let engine = Arc::clone(&self.engine);
        run_batch(requests, workers, move |opts| {
            let engine = Arc::clone(&engine);
            async move { engine.scrape(opts).await }
        })
        .await
    }
}

/// Core worker-pool loop, generic over the per-job operation so panic
/// isolation and channel plumbing can be tested without an engine.
pub(crate) async fn run_batch<F, Fut>(
    requests: Vec<RequestOptions>,
    workers: usize,
    job: F,
) -> mpsc::Receiver<ScrapeResult>
where
    F: Fn(RequestOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<PageData>> + Send + 'static,
{
    let total = requests.len();
    let (result_tx, result_rx) = mpsc::channel(total.max(1));
    if total == 0 {
        return result_rx;
    }

    let (job_tx, job_rx) = mpsc::channel::<RequestOptions>(total);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let job = Arc::new(job);

    let workers = workers.clamp(1, MAX_WORKERS).min(total);
    debug!(total, workers, "starting batch");

    for _ in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let job = Arc::clone(&job);
        let result_tx = result_tx.clone();
        tokio::spawn(async move {
            loop {
                let next = { job_rx.lock().await.recv().await };
                let Some(opts) = next else { break };
                let url = opts.url.clone();

                let result = match AssertUnwindSafe(job(opts)).catch_unwind().await {
                    Ok(Ok(data)) => ScrapeResult {
                        url,
                        data: Some(data),
                        error: None,
                    },
                    Ok(Err(e)) => ScrapeResult {
                        url,
                        data: None,
                        error: Some(e),
                    },
                    Err(panic) => ScrapeResult {
                        url,
                        data: None,
                        error: Some(EngineError::WorkerPanic(panic_message(&panic))),
                    },
                };

                // A closed result channel means the caller dropped the
                // receiver; the batch is cancelled.
                if result_tx.send(result).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    // The jobs channel holds every job, so these sends never block.
    for opts in interleave_by_host(requests) {
        if job_tx.send(opts).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    result_rx
}

/// Round-robin across per-host groups, keeping per-host order.
fn interleave_by_host(requests: Vec<RequestOptions>) -> Vec<RequestOptions> {
    let mut groups: Vec<(String, VecDeque<RequestOptions>)> = Vec::new();
    for opts in requests {
        let host = url::Url::parse(&opts.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        match groups.iter_mut().find(|(h, _)| *h == host) {
            Some((_, group)) => group.push_back(opts),
            None => groups.push((host, VecDeque::from([opts]))),
        }
    }

    let total: usize = groups.iter().map(|(_, g)| g.len()).sum();
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        for (_, group) in &mut groups {
            if let Some(opts) = group.pop_front() {
                out.push(opts);
            }
        }
    }
    out
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reqs(urls: &[&str]) -> Vec<RequestOptions> {
        urls.iter().map(|u| RequestOptions::new(*u)).collect()
    }

    async fn collect(mut rx: mpsc::Receiver<ScrapeResult>) -> Vec<ScrapeResult> {
        let mut out = Vec::new();
        while let Some(result) = rx.recv().await {
            out.push(result);
        }
        out
    }

    #[tokio::test]
    async fn every_job_yields_exactly_one_result() {
        let requests = reqs(&[
            "https://a.example/1",
            "https://a.example/2",
            "https://b.example/1",
        ]);
        let rx = run_batch(requests, 2, |opts| async move {
            Ok(PageData::new(&opts.url))
        })
        .await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(ScrapeResult::is_success));
    }

    #[tokio::test]
    async fn panicking_jobs_become_failed_results_without_hanging() {
        let requests = reqs(&[
            "https://a.example/1",
            "https://a.example/2",
            "https://a.example/3",
            "https://a.example/4",
        ]);
        let rx = run_batch(requests, 3, |opts| async move {
            if opts.url.ends_with('3') {
                Ok(PageData::new(&opts.url))
            } else {
                panic!("job blew up")
            }
        })
        .await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 4);

        let panics = results
            .iter()
            .filter(|r| matches!(r.error, Some(EngineError::WorkerPanic(_))))
            .count();
        assert_eq!(panics, 3);
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 1);
    }

    #[tokio::test]
    async fn empty_batch_returns_a_closed_channel() {
        let mut rx = run_batch(Vec::new(), 4, |opts| async move {
            Ok(PageData::new(&opts.url))
        })
        .await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn errors_pass_through_untouched() {
        let requests = reqs(&["https://a.example/1"]);
        let rx = run_batch(requests, 1, |opts| async move {
            Err(EngineError::UpstreamStatus {
                url: opts.url,
                status: 503,
            })
        })
        .await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error.as_ref().unwrap().status_code(), Some(503));
    }

    #[test]
    fn interleave_alternates_hosts() {
        let requests = reqs(&[
            "https://a.example/1",
            "https://a.example/2",
            "https://b.example/1",
            "https://b.example/2",
        ]);
        let ordered = interleave_by_host(requests);
        let hosts: Vec<_> = ordered
            .iter()
            .map(|o| url::Url::parse(&o.url).unwrap().host_str().unwrap().to_string())
            .collect();
        assert_eq!(hosts, ["a.example", "b.example", "a.example", "b.example"]);
    }
}
