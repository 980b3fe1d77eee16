use std::ops::RangeInclusive;

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::Client;

use crate::error::{ProtocolError, Result};

/// What a metadata probe learned about a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub resumable: bool,
    pub chunk_count: usize,
}

/// Byte layout of a resource cut into fixed-size chunks.
///
/// Chunk `i` covers `[i * chunk_size, min((i + 1) * chunk_size, size) - 1]`.
/// A zero-byte resource still has one (empty) chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGeometry {
    size: u64,
    chunk_size: u64,
}

impl ChunkGeometry {
    /// `chunk_size` must be non-zero; [`DownloadConfig::validate`](crate::DownloadConfig::validate)
    /// rejects zero before a geometry is ever built.
    pub fn new(size: u64, chunk_size: u64) -> Self {
        debug_assert!(chunk_size > 0, "chunk size must be greater than zero");
        Self { size, chunk_size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        (self.size.div_ceil(self.chunk_size) as usize).max(1)
    }

    /// Inclusive byte range of chunk `index`, as sent in a `Range` header.
    pub fn range(&self, index: usize) -> RangeInclusive<u64> {
        let start = index as u64 * self.chunk_size;
        let end = (start + self.chunk_size).min(self.size).saturating_sub(1);
        start..=end
    }

    pub fn chunk_len(&self, index: usize) -> u64 {
        let start = index as u64 * self.chunk_size;
        (start + self.chunk_size).min(self.size).saturating_sub(start)
    }
}

/// Issues a HEAD request and derives size, range support and chunk count.
///
/// There is no retry here; any failure aborts the download of `url`.
pub async fn probe(client: &Client, url: &str, chunk_size: u64) -> Result<FileMetadata> {
    let response = client.head(url).send().await?;

    if !response.status().is_success() {
        return Err(ProtocolError::BadStatus(response.status()).into());
    }

    let headers = response.headers();
    let raw = headers
        .get(CONTENT_LENGTH)
        .ok_or(ProtocolError::MissingLength)?
        .to_str()
        .map_err(|_| ProtocolError::InvalidLength("<non-ascii>".to_string()))?;
    let size = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidLength(raw.to_string()))?;

    let resumable = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")));

    Ok(FileMetadata {
        size,
        resumable,
        chunk_count: ChunkGeometry::new(size, chunk_size).chunk_count(),
    })
}
