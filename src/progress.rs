//! Progress reporting capability handed to the engine.
//!
//! The engine only logs lines and moves byte counters; how that is shown is
//! up to the implementation.
use futures::{Stream, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub trait ProgressSink: Send + Sync {
    fn log(&self, message: &str);
    fn set_total(&self, total: u64);
    fn set_position(&self, position: u64);
    fn inc(&self, bytes: u64);
    fn finish(&self, message: &str);
}

/// Passes a byte stream through unchanged, reporting every successful piece
/// to `sink`.
pub fn observed<'a, S, B, E>(stream: S, sink: &'a dyn ProgressSink) -> impl Stream<Item = Result<B, E>> + 'a
where
    S: Stream<Item = Result<B, E>> + 'a,
    B: AsRef<[u8]> + 'a,
    E: 'a,
{
    stream.inspect(move |item| {
        if let Ok(bytes) = item {
            sink.inc(bytes.as_ref().len() as u64);
        }
    })
}

/// One indicatif bar per download inside a shared [`MultiProgress`].
pub struct BarSink {
    multi: MultiProgress,
    bar: ProgressBar,
}

impl BarSink {
    pub fn new(multi: &MultiProgress, name: &str) -> Self {
        let bar = multi.add(ProgressBar::new(0));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message(format!("Downloading {}", name));
        Self {
            multi: multi.clone(),
            bar,
        }
    }
}

impl ProgressSink for BarSink {
    fn log(&self, message: &str) {
        if self.multi.println(message).is_err() {
            eprintln!("{}", message);
        }
    }

    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    fn set_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    fn inc(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// Discards everything. For library use without a terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn log(&self, _message: &str) {}
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _position: u64) {}
    fn inc(&self, _bytes: u64) {}
    fn finish(&self, _message: &str) {}
}
