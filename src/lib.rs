//! Chunked, resumable HTTP downloads.
//!
//! A resource is probed with HEAD, preallocated on disk, split into
//! fixed-size byte ranges and fetched by a bounded worker pool. Completed
//! chunks are tracked in a `<name>.progress` record next to the file so an
//! interrupted download picks up where it stopped.

pub mod cli;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod metadata;
pub mod pool;
pub mod progress;
pub mod state;
pub mod utils;
pub mod writer;

pub use config::DownloadConfig;
pub use downloader::Downloader;
pub use error::{DownloadError, ProtocolError, Result};
pub use metadata::{ChunkGeometry, FileMetadata};
pub use progress::{ProgressSink, SilentSink};
pub use state::DownloadState;
