//! Worker pool for bulk downloads.
//!
//! Same shape as the batch scraper pool: a jobs channel feeds a fixed
//! set of workers, every job produces exactly one outcome (panics
//! included), and dropping the receiver cancels the batch.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{DownloadOutcome, Downloader};
use crate::errors::EngineError;

const MAX_WORKERS: usize = 50;

/// Concurrent downloader over a shared [`Downloader`].
pub struct DownloadPool {
    downloader: Arc<Downloader>,
    workers: usize,
}

impl DownloadPool {
    #[must_use]
    pub fn new(downloader: Arc<Downloader>, workers: usize) -> Self {
        Self {
            downloader,
            workers: workers.clamp(1, MAX_WORKERS),
        }
    }

    /// Download every URL into `dest_dir`, streaming outcomes as they
    /// complete. Delivers exactly one outcome per URL.
    pub async fn download_batch(
        &self,
        urls: Vec<String>,
        dest_dir: PathBuf,
    ) -> mpsc::Receiver<DownloadOutcome> {
        let total = urls.len();
        let (result_tx, result_rx) = mpsc::channel(total.max(1));
        if total == 0 {
            return result_rx;
        }

        let (job_tx, job_rx) = mpsc::channel::<String>(total);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let workers = self.workers.min(total);
        debug!(total, workers, "starting download batch");

        for _ in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let downloader = Arc::clone(&self.downloader);
            let result_tx = result_tx.clone();
            let dest_dir = dest_dir.clone();
            tokio::spawn(async move {
                loop {
                    let next = { job_rx.lock().await.recv().await };
                    let Some(url) = next else { break };

                    let fut = downloader.download(&url, &dest_dir);
                    let result = match AssertUnwindSafe(fut).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => {
                            let msg = panic
                                .downcast_ref::<&str>()
                                .map(|s| (*s).to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            Err(EngineError::WorkerPanic(msg))
                        }
                    };

                    let outcome = DownloadOutcome { url, result };
                    if result_tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        for url in urls {
            if job_tx.send(url).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        result_rx
    }
}
