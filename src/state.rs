//! Persisted per-chunk progress.
//!
//! The record lives next to the download as `<name>.progress` (JSON) and is
//! the only thing a later run needs to skip chunks that already landed on disk.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{DownloadError, Result};
use crate::metadata::ChunkGeometry;

pub const PROGRESS_EXTENSION: &str = "progress";

/// Path of the progress record for the download `name` inside `dir`.
pub fn progress_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{PROGRESS_EXTENSION}"))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadState {
    dir: PathBuf,
    name: String,
    size: u64,
    chunk_size: u64,
    chunk_done: Vec<bool>,
    done_count: usize,
}

impl DownloadState {
    /// Fresh record with every chunk of `geometry` pending.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, geometry: ChunkGeometry) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            size: geometry.size(),
            chunk_size: geometry.chunk_size(),
            chunk_done: vec![false; geometry.chunk_count()],
            done_count: 0,
        }
    }

    /// Reads a record from `path`. `Ok(None)` means there is no record.
    pub async fn load_from(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DownloadError::fs(path, e)),
        };

        let state: Self =
            serde_json::from_slice(&content).map_err(|source| DownloadError::StateCorruption {
                path: path.to_path_buf(),
                source,
            })?;

        let counted = state.chunk_done.iter().filter(|done| **done).count();
        let consistent = state.chunk_size > 0
            && state.chunk_done.len() == ChunkGeometry::new(state.size, state.chunk_size).chunk_count()
            && counted == state.done_count;
        if !consistent {
            return Err(DownloadError::StateCorruption {
                path: path.to_path_buf(),
                source: serde::de::Error::custom(format!(
                    "inconsistent record: size {}, chunkSize {}, {} chunks, {} marked done, doneCount {}",
                    state.size,
                    state.chunk_size,
                    state.chunk_done.len(),
                    counted,
                    state.done_count
                )),
            });
        }

        Ok(Some(state))
    }

    /// Resumes from an existing record or starts a fresh one.
    ///
    /// A record that cannot be parsed, or that was written for a different
    /// resource size or chunk size, is an error; it is never silently replaced.
    pub async fn load_or_create(dir: &Path, name: &str, geometry: ChunkGeometry) -> Result<Self> {
        let path = progress_path(dir, name);
        let Some(mut state) = Self::load_from(&path).await? else {
            return Ok(Self::new(dir, name, geometry));
        };

        if state.chunk_size != geometry.chunk_size() {
            return Err(DownloadError::StateMismatch {
                path,
                field: "chunkSize",
                recorded: state.chunk_size,
                expected: geometry.chunk_size(),
            });
        }
        // Same chunk count is not enough: a resized resource shifts bytes.
        if state.size != geometry.size() {
            return Err(DownloadError::StateMismatch {
                path,
                field: "size",
                recorded: state.size,
                expected: geometry.size(),
            });
        }

        // The record follows the download if the directory was moved.
        state.dir = dir.to_path_buf();
        state.name = name.to_string();
        Ok(state)
    }

    /// Marks chunk `index` as done. Returns `false` if it already was.
    pub fn mark_done(&mut self, index: usize) -> bool {
        match self.chunk_done.get_mut(index) {
            Some(done) if !*done => {
                *done = true;
                self.done_count += 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_done(&self, index: usize) -> bool {
        self.chunk_done.get(index).copied().unwrap_or(false)
    }

    /// Indices not yet marked done, in ascending order.
    pub fn pending(&self) -> impl Iterator<Item = usize> + '_ {
        self.chunk_done
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(index, _)| index)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_done.len()
    }

    pub fn done_count(&self) -> usize {
        self.done_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_complete(&self) -> bool {
        self.done_count == self.chunk_done.len()
    }

    /// Bytes covered by completed chunks.
    pub fn completed_bytes(&self, geometry: &ChunkGeometry) -> u64 {
        self.chunk_done
            .iter()
            .enumerate()
            .filter(|(_, done)| **done)
            .map(|(index, _)| geometry.chunk_len(index))
            .sum()
    }

    pub fn path(&self) -> PathBuf {
        progress_path(&self.dir, &self.name)
    }

    /// Writes the whole record, replacing any previous version atomically
    /// (temp file + rename).
    pub async fn persist(&self) -> Result<()> {
        let path = self.path();
        let tmp = path.with_extension(format!("{PROGRESS_EXTENSION}.tmp"));

        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| DownloadError::fs(&path, std::io::Error::new(ErrorKind::InvalidData, e)))?;
        fs::write(&tmp, content)
            .await
            .map_err(|e| DownloadError::fs(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| DownloadError::fs(&path, e))?;
        Ok(())
    }

    /// Deletes the record. A missing record is not an error.
    pub async fn remove(&self) -> Result<()> {
        let path = self.path();
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::fs(path, e)),
        }
    }
}
