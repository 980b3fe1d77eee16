use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;

/// Server-side contract violations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("server returned status {0}")]
    BadStatus(StatusCode),

    #[error("Content-Length header missing")]
    MissingLength,

    #[error("invalid Content-Length value: {0:?}")]
    InvalidLength(String),

    #[error("server ignored the Range header and sent the whole body")]
    RangeNotHonored,

    #[error("expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("filesystem error on '{}': {source}", .path.display())]
    Filesystem { path: PathBuf, source: io::Error },

    #[error("progress record '{}' is corrupted: {source}", .path.display())]
    StateCorruption {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(
        "progress record '{}' was written with {field} = {recorded}, current run uses {expected}",
        .path.display()
    )]
    StateMismatch {
        path: PathBuf,
        field: &'static str,
        recorded: u64,
        expected: u64,
    },

    #[error("chunk {index} failed after {attempts} attempts: {source}")]
    ChunkExhausted {
        index: usize,
        attempts: u32,
        source: Box<DownloadError>,
    },

    #[error("{}", summarize(.failures))]
    ChunksFailed { failures: Vec<DownloadError> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Indices of the chunks that never succeeded, for `ChunksFailed`.
    pub fn failed_chunks(&self) -> Vec<usize> {
        match self {
            Self::ChunksFailed { failures } => failures
                .iter()
                .filter_map(|f| match f {
                    Self::ChunkExhausted { index, .. } => Some(*index),
                    _ => None,
                })
                .collect(),
            Self::ChunkExhausted { index, .. } => vec![*index],
            _ => Vec::new(),
        }
    }
}

fn summarize(failures: &[DownloadError]) -> String {
    let details = failures
        .iter()
        .map(|f| match f {
            DownloadError::ChunkExhausted { index, source, .. } => format!("#{index} ({source})"),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} chunk(s) failed: {}", failures.len(), details)
}

pub type Result<T> = std::result::Result<T, DownloadError>;
