use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::error::{DownloadError, ProtocolError, Result};
use crate::fetcher::{ChunkFetcher, RetryPolicy};
use crate::metadata::{self, ChunkGeometry, FileMetadata};
use crate::pool::WorkerPool;
use crate::progress::{self, ProgressSink};
use crate::state::DownloadState;
use crate::utils::file_name_for;
use crate::writer::SafeWriter;

/// Lifecycle of one download, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Probing,
    Allocating,
    Scheduling,
    Draining,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Probing => "probing",
            Phase::Allocating => "allocating",
            Phase::Scheduling => "scheduling",
            Phase::Draining => "draining",
            Phase::Persisting => "persisting",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct Downloader {
    client: Client,
    config: DownloadConfig,
}

impl Downloader {
    /// Builds the shared HTTP client. Fails on a config that
    /// [`DownloadConfig::validate`] rejects.
    pub fn new(config: DownloadConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .user_agent(concat!("rangedl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Downloads `url` into `dir`, returning the path of the finished file.
    ///
    /// Ranged servers get the chunked, resumable path; everything else a
    /// single streamed GET. The progress record is written even when chunks
    /// fail or the run is cancelled, so the next run only fetches what is
    /// missing.
    pub async fn download(
        &self,
        url: &str,
        dir: &Path,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let name = file_name_for(url);
        let result = self.run(url, dir, &name, sink.clone(), cancel).await;
        match &result {
            Ok(_) => {
                debug!(%url, phase = %Phase::Done);
                sink.finish(&format!("Completed   {}", name));
            }
            Err(e) => {
                debug!(%url, phase = %Phase::Failed, error = %e);
                sink.finish(&format!("Failed      {}", name));
            }
        }
        result
    }

    async fn run(
        &self,
        url: &str,
        dir: &Path,
        name: &str,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        debug!(%url, phase = %Phase::Probing);
        let meta = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            meta = metadata::probe(&self.client, url, self.config.chunk_size) => meta?,
        };
        sink.set_total(meta.size);

        debug!(%url, phase = %Phase::Allocating, size = meta.size);
        fs::create_dir_all(dir)
            .await
            .map_err(|e| DownloadError::fs(dir, e))?;
        let path = dir.join(name);
        let writer = Arc::new(SafeWriter::create(&path, meta.size).await?);

        if meta.resumable && meta.chunk_count > 1 {
            info!(%url, chunks = meta.chunk_count, "chunked download");
            self.download_chunks(url, dir, name, &meta, writer, sink, cancel)
                .await?;
        } else {
            info!(%url, resumable = meta.resumable, "direct download");
            self.download_direct(url, &meta, &writer, sink.as_ref(), cancel)
                .await?;
        }
        Ok(path)
    }

    #[allow(clippy::too_many_arguments)]
    async fn download_chunks(
        &self,
        url: &str,
        dir: &Path,
        name: &str,
        meta: &FileMetadata,
        writer: Arc<SafeWriter>,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let geometry = ChunkGeometry::new(meta.size, self.config.chunk_size);
        let state = DownloadState::load_or_create(dir, name, geometry).await?;

        if state.done_count() > 0 {
            sink.log(&format!(
                "Resuming {}: {}/{} chunks already downloaded",
                name,
                state.done_count(),
                state.chunk_count()
            ));
        }
        sink.set_position(state.completed_bytes(&geometry));

        debug!(%url, phase = %Phase::Scheduling, pending = state.chunk_count() - state.done_count());
        let fetcher = ChunkFetcher::new(self.client.clone(), geometry, writer.clone(), sink.clone());
        let pool = WorkerPool::new(
            Arc::new(fetcher),
            RetryPolicy::from(&self.config),
            self.config.workers,
            sink.clone(),
        );

        debug!(%url, phase = %Phase::Draining);
        let report = pool.run(url, state, cancel).await;

        debug!(%url, phase = %Phase::Persisting);
        // A record must never claim chunks whose bytes failed to reach disk.
        writer.sync().await?;
        report.state.persist().await?;

        if report.cancelled {
            return Err(DownloadError::Cancelled);
        }
        if !report.failures.is_empty() {
            return Err(DownloadError::ChunksFailed {
                failures: report.failures,
            });
        }

        if !self.config.keep_progress {
            if let Err(e) = report.state.remove().await {
                warn!(error = %e, "could not remove progress record");
            }
        }
        Ok(())
    }

    /// Single GET without ranging. No chunk state, no per-chunk retry.
    async fn download_direct(
        &self,
        url: &str,
        meta: &FileMetadata,
        writer: &SafeWriter,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.client.get(url).send() => response?,
        };
        if response.status() != StatusCode::OK {
            return Err(ProtocolError::BadStatus(response.status()).into());
        }

        let stream = progress::observed(response.bytes_stream(), sink);
        tokio::pin!(stream);

        let mut received = 0u64;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(piece) = next else { break };
            let piece = piece?;
            writer.write_at(received, &piece).await?;
            received += piece.len() as u64;
        }

        writer.sync().await?;
        if received != meta.size {
            return Err(ProtocolError::LengthMismatch {
                expected: meta.size,
                received,
            }
            .into());
        }
        Ok(())
    }
}
