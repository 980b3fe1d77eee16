use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DownloadConfig;
use crate::error::{DownloadError, ProtocolError, Result};
use crate::metadata::ChunkGeometry;
use crate::progress::{self, ProgressSink};
use crate::writer::SafeWriter;

/// Fixed-count, fixed-delay retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<&DownloadConfig> for RetryPolicy {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.retry_delay,
        }
    }
}

/// Transfers single chunks of one resource into a shared [`SafeWriter`].
pub struct ChunkFetcher {
    client: Client,
    geometry: ChunkGeometry,
    writer: Arc<SafeWriter>,
    sink: Arc<dyn ProgressSink>,
}

impl ChunkFetcher {
    pub fn new(
        client: Client,
        geometry: ChunkGeometry,
        writer: Arc<SafeWriter>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            client,
            geometry,
            writer,
            sink,
        }
    }

    /// One ranged GET for chunk `index`, streamed to its offset.
    ///
    /// Only `206 Partial Content` is accepted. A `200 OK` means the server
    /// ignored the range; the body is not written.
    pub async fn fetch(&self, url: &str, index: usize, cancel: &CancellationToken) -> Result<u64> {
        let range = self.geometry.range(index);
        let (start, end) = (*range.start(), *range.end());
        let expected = self.geometry.chunk_len(index);

        let request = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request => response?,
        };

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => return Err(ProtocolError::RangeNotHonored.into()),
            status => return Err(ProtocolError::BadStatus(status).into()),
        }

        let stream = progress::observed(response.bytes_stream(), self.sink.as_ref());
        tokio::pin!(stream);

        let mut received = 0u64;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(piece) = next else { break };
            let piece = piece?;

            let len = piece.len() as u64;
            if received + len > expected {
                return Err(ProtocolError::LengthMismatch {
                    expected,
                    received: received + len,
                }
                .into());
            }
            self.writer.write_at(start + received, &piece).await?;
            received += len;
        }

        if received != expected {
            return Err(ProtocolError::LengthMismatch { expected, received }.into());
        }
        Ok(received)
    }

    /// [`fetch`](Self::fetch) with up to `policy.max_attempts` tries.
    ///
    /// Exhausting the attempts yields [`DownloadError::ChunkExhausted`].
    /// Cancellation during a request or during the delay returns
    /// [`DownloadError::Cancelled`] right away.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        index: usize,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.fetch(url, index, cancel).await {
                Ok(bytes) => {
                    debug!(index, attempt, bytes, "chunk complete");
                    return Ok(bytes);
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => e,
            };

            if attempt >= policy.max_attempts {
                return Err(DownloadError::ChunkExhausted {
                    index,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            warn!(index, attempt, error = %err, "chunk attempt failed");
            self.sink.log(&format!(
                "Error downloading chunk {}: {}. Retrying in {:?}...",
                index, err, policy.delay
            ));

            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }
}
