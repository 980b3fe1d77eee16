use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{DownloadConfig, DEFAULT_CHUNK_SIZE, DEFAULT_WORKERS, MAX_ATTEMPTS};

/// Chunked, resumable HTTP downloader.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory to save downloaded files
    #[arg(index = 1)]
    pub dir: PathBuf,

    /// URLs to download
    #[arg(index = 2, required_unless_present = "list")]
    pub urls: Vec<String>,

    /// Chunk size in bytes
    #[arg(short = 's', long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Concurrent chunk workers per file
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Attempts per chunk before giving up on it
    #[arg(short = 'r', long, default_value_t = MAX_ATTEMPTS)]
    pub retries: u32,

    /// Seconds to wait between attempts
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Maximum number of files downloaded at once (defaults to number of logical CPUs)
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Keep the .progress record after a successful download
    #[arg(long)]
    pub keep_progress: bool,

    /// List resumable downloads in DIR and exit
    #[arg(short = 'l', long)]
    pub list: bool,
}

impl Args {
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            chunk_size: self.chunk_size,
            workers: self.workers,
            max_attempts: self.retries,
            retry_delay: Duration::from_secs(self.retry_delay),
            request_timeout: Duration::from_secs(self.timeout),
            keep_progress: self.keep_progress,
            ..DownloadConfig::default()
        }
    }
}
