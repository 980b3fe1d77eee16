//! Fan-out/fan-in over chunk jobs.
//!
//! One producer feeds a bounded job queue, `workers` tasks fetch chunks and
//! report on a bounded result queue, and a single aggregator applies every
//! result to the [`DownloadState`]. Nothing else touches the state while the
//! pool runs.
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{DownloadError, Result};
use crate::fetcher::{ChunkFetcher, RetryPolicy};
use crate::progress::ProgressSink;
use crate::state::DownloadState;

#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub index: usize,
    pub url: Arc<str>,
}

#[derive(Debug)]
pub struct ChunkResult {
    pub index: usize,
    pub outcome: Result<u64>,
}

/// What the pool hands back once fully drained.
#[derive(Debug)]
pub struct PoolReport {
    pub state: DownloadState,
    /// One `ChunkExhausted` per chunk that never succeeded.
    pub failures: Vec<DownloadError>,
    pub cancelled: bool,
}

pub struct WorkerPool {
    fetcher: Arc<ChunkFetcher>,
    policy: RetryPolicy,
    workers: usize,
    sink: Arc<dyn ProgressSink>,
    checkpoint: bool,
}

impl WorkerPool {
    pub fn new(
        fetcher: Arc<ChunkFetcher>,
        policy: RetryPolicy,
        workers: usize,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            fetcher,
            policy,
            workers: workers.max(1),
            sink,
            checkpoint: true,
        }
    }

    /// Disables the per-chunk progress record writes made while draining.
    pub fn without_checkpoints(mut self) -> Self {
        self.checkpoint = false;
        self
    }

    /// Fetches every chunk of `state` not yet done, best effort.
    ///
    /// A chunk that exhausts its retries is recorded in the report and does
    /// not stop its siblings. The state is returned updated but not persisted.
    pub async fn run(&self, url: &str, mut state: DownloadState, cancel: &CancellationToken) -> PoolReport {
        let url: Arc<str> = Arc::from(url);
        let pending: Vec<usize> = state.pending().collect();

        let (job_tx, job_rx) = mpsc::channel::<ChunkJob>(self.workers);
        let (result_tx, mut result_rx) = mpsc::channel::<ChunkResult>(self.workers);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let handles: Vec<_> = (0..self.workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    job_rx.clone(),
                    result_tx.clone(),
                    self.fetcher.clone(),
                    self.policy,
                    cancel.clone(),
                ))
            })
            .collect();

        let produce = async move {
            for index in pending {
                let job = ChunkJob {
                    index,
                    url: url.clone(),
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = job_tx.send(job) => if sent.is_err() { break },
                }
            }

            // Strict order: close jobs, wait for workers, then close results.
            drop(job_tx);
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    error!(error = %e, "chunk worker aborted");
                }
            }
            drop(result_tx);
        };

        let mut failures = Vec::new();
        let aggregate = async {
            while let Some(result) = result_rx.recv().await {
                match result.outcome {
                    Ok(bytes) => {
                        debug!(index = result.index, bytes, "chunk recorded");
                        if state.mark_done(result.index) && self.checkpoint {
                            if let Err(e) = state.persist().await {
                                warn!(error = %e, "progress checkpoint failed");
                            }
                        }
                    }
                    Err(e) => {
                        self.sink.log(&format!("Failed chunk {}: {}", result.index, e));
                        failures.push(e);
                    }
                }
            }
        };

        tokio::join!(produce, aggregate);

        failures.sort_by_key(|f| f.failed_chunks().first().copied().unwrap_or(usize::MAX));
        PoolReport {
            state,
            failures,
            cancelled: cancel.is_cancelled(),
        }
    }
}

async fn worker(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<ChunkJob>>>,
    results: mpsc::Sender<ChunkResult>,
    fetcher: Arc<ChunkFetcher>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                job = jobs.recv() => job,
            }
        };
        let Some(job) = job else { return };

        debug!(worker = id, index = job.index, "chunk dispatched");
        let outcome = fetcher
            .fetch_with_retry(&job.url, job.index, &policy, &cancel)
            .await;
        if matches!(outcome, Err(DownloadError::Cancelled)) {
            return;
        }

        let result = ChunkResult {
            index: job.index,
            outcome,
        };
        // The aggregator reads until every sender is gone, so a finished
        // chunk is still delivered when cancellation races the send.
        tokio::select! {
            biased;
            sent = results.send(result) => if sent.is_err() { return },
            _ = cancel.cancelled() => return,
        }
    }
}
