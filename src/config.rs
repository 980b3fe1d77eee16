use std::time::Duration;

use crate::error::{DownloadError, Result};

pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_WORKERS: usize = 8;
pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Tunables for a [`Downloader`](crate::Downloader).
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Bytes per chunk. Fixed for the life of a progress record.
    pub chunk_size: u64,
    /// Concurrent workers per URL.
    pub workers: usize,
    /// Attempts per chunk before it is reported as failed.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Keep the `.progress` record after a fully successful download.
    pub keep_progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            keep_progress: false,
        }
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(DownloadError::InvalidConfig("chunk size must be greater than zero"));
        }
        if self.workers == 0 {
            return Err(DownloadError::InvalidConfig("worker count must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(DownloadError::InvalidConfig(
                "at least one attempt per chunk is required",
            ));
        }
        Ok(())
    }
}
