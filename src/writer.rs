use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{DownloadError, Result};

/// Sole owner of the output file handle.
///
/// The handle has one cursor, so every seek + write pair runs under one lock.
/// Chunk ranges never overlap; the lock only keeps two writers from moving the
/// cursor under each other.
#[derive(Debug)]
pub struct SafeWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl SafeWriter {
    /// Opens `path` without truncating and sizes it to exactly `size` bytes,
    /// so out-of-order writes never grow the file and finished chunks from an
    /// earlier run survive.
    pub async fn create(path: &Path, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(path)
            .await
            .map_err(|e| DownloadError::fs(path, e))?;

        file.set_len(size)
            .await
            .map_err(|e| DownloadError::fs(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `data` at `offset`. On return the bytes have reached the file,
    /// so a failed write is reported against the caller that issued it.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| DownloadError::fs(&self.path, e))?;
        file.write_all(data)
            .await
            .map_err(|e| DownloadError::fs(&self.path, e))?;
        // tokio's File finishes the last piece in the background.
        file.flush()
            .await
            .map_err(|e| DownloadError::fs(&self.path, e))?;
        Ok(())
    }

    /// Flushes buffered writes and syncs file contents to disk.
    pub async fn sync(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush()
            .await
            .map_err(|e| DownloadError::fs(&self.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| DownloadError::fs(&self.path, e))
    }
}
