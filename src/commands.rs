use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indicatif::{HumanBytes, MultiProgress, ProgressDrawTarget};
use tokio::fs;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;
use crate::downloader::Downloader;
use crate::progress::{BarSink, ProgressSink};
use crate::state::{DownloadState, PROGRESS_EXTENSION};
use crate::utils::file_name_for;

/// Downloads every URL into `output`, at most `concurrency` at a time.
///
/// Each URL succeeds or fails on its own; the error returned at the end only
/// summarizes how many failed.
pub async fn run_downloads(
    urls: Vec<String>,
    output: PathBuf,
    config: DownloadConfig,
    concurrency: usize,
    cancel: CancellationToken,
) -> Result<()> {
    fs::create_dir_all(&output)
        .await
        .with_context(|| format!("Failed to create output directory {:?}", output))?;

    let multi_progress = MultiProgress::new();
    multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

    let mut failed: Vec<(String, String)> = Vec::new();

    // Two URLs resolving to the same file would write over each other.
    let mut claimed: HashMap<String, String> = HashMap::new();
    let mut accepted = Vec::with_capacity(urls.len());
    for url in urls {
        let name = file_name_for(&url);
        match claimed.get(&name) {
            Some(owner) if *owner == url => continue,
            Some(owner) => failed.push((url, format!("destination {} already used by {}", name, owner))),
            None => {
                claimed.insert(name, url.clone());
                accepted.push(url);
            }
        }
    }

    // Exact repeats are dropped above, rejected destinations still count.
    let total = accepted.len() + failed.len();

    let downloader = Arc::new(Downloader::new(config)?);
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = vec![];

    for url in accepted {
        let downloader = downloader.clone();
        let semaphore = semaphore.clone();
        let output = output.clone();
        let cancel = cancel.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(BarSink::new(&multi_progress, &file_name_for(&url)));

        handles.push(tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(crate::DownloadError::Cancelled),
                permit = semaphore.acquire_owned() => match permit {
                    Ok(_permit) => downloader.download(&url, &output, sink, &cancel).await,
                    Err(_) => Err(crate::DownloadError::Cancelled),
                },
            };
            (url, result)
        }));
    }

    for handle in handles {
        let (url, result) = handle.await.context("download task panicked")?;
        if let Err(e) = result {
            failed.push((url, e.to_string()));
        }
    }

    for (url, reason) in &failed {
        eprintln!("Failed to download {}: {}", url, reason);
    }
    if !failed.is_empty() {
        bail!("{} of {} downloads failed", failed.len(), total);
    }
    Ok(())
}

/// Prints every progress record found in `output`.
pub async fn list_downloads(output: PathBuf) -> Result<()> {
    if !output.exists() {
        println!("Output directory '{:?}' does not exist.", output);
        return Ok(());
    }

    let mut records = Vec::new();
    let mut entries = fs::read_dir(&output)
        .await
        .with_context(|| format!("Failed to read {:?}", output))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == PROGRESS_EXTENSION) {
            match DownloadState::load_from(&path).await {
                Ok(Some(state)) => records.push(state),
                Ok(None) => {}
                Err(e) => eprintln!("Skipping {:?}: {}", path, e),
            }
        }
    }

    if records.is_empty() {
        println!("No resumable downloads found in '{:?}'.", output);
        return Ok(());
    }

    records.sort_by(|a, b| a.name().cmp(b.name()));
    println!("{:<50} {:<15} {:<15} {:<15}", "Filename", "Chunks", "Progress", "Downloaded");
    println!("{:-<50} {:-<15} {:-<15} {:-<15}", "", "", "", "");
    for state in records {
        let progress = state.done_count() as f64 / state.chunk_count() as f64 * 100.0;
        // The last chunk may be short; whole chunks are close enough here.
        let approx_bytes = state.done_count() as u64 * state.chunk_size();
        println!(
            "{:<50} {:<15} {:<15} {:<15}",
            state.name(),
            format!("{}/{}", state.done_count(), state.chunk_count()),
            format!("{:.2}%", progress),
            format!("~{}", HumanBytes(approx_bytes))
        );
    }
    Ok(())
}
