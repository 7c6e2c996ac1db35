use std::sync::Mutex;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use mlready_core::progress::{format_bytes, ProgressObserver, ProgressSnapshot};
use mlready_core::{FetchError, FetchReason};

/// Renders an artifact transfer as a single indicatif bar.
///
/// The bar is created lazily on the first `on_progress` call, when the
/// expected size is known; without a `content-length` it is a spinner.
pub struct TerminalProgressObserver {
    name: String,
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalProgressObserver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bar: Mutex::new(None),
        }
    }

    fn ensure_bar(&self, snapshot: &ProgressSnapshot) -> ProgressBar {
        let mut bar = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        bar.get_or_insert_with(|| {
            let pb = if snapshot.total_bytes > 0 {
                let style = ProgressStyle::with_template(concat!(
                    "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ",
                    "({binary_bytes_per_sec}) ETA {eta}",
                ))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-");
                let pb = ProgressBar::new(snapshot.total_bytes);
                pb.set_style(style);
                pb
            } else {
                let style =
                    ProgressStyle::with_template("{spinner} {msg} {bytes} ({binary_bytes_per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner());
                let pb = ProgressBar::new_spinner();
                pb.set_style(style);
                pb
            };
            pb.set_message(self.name.clone());
            pb
        })
        .clone()
    }

    fn take_bar(&self) -> Option<ProgressBar> {
        self.bar.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[async_trait]
impl ProgressObserver for TerminalProgressObserver {
    async fn on_start(&self, reason: &FetchReason) {
        eprintln!("Fetching {}: {}", self.name, reason);
    }

    async fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let pb = self.ensure_bar(snapshot);
        pb.set_position(snapshot.bytes_transferred);
    }

    async fn on_retry(&self, attempt: u32, error: &FetchError) {
        if let Some(pb) = self.take_bar() {
            pb.abandon_with_message(format!("attempt {} failed: {}", attempt, error));
        } else {
            eprintln!("attempt {} failed: {}", attempt, error);
        }
    }

    async fn on_complete(&self, snapshot: &ProgressSnapshot) {
        let pb = self.ensure_bar(snapshot);
        pb.set_position(snapshot.bytes_transferred);
        pb.finish_with_message(format!(
            "{} complete: {} at {}/s",
            self.name,
            format_bytes(snapshot.bytes_transferred),
            format_bytes(snapshot.speed as u64)
        ));
    }

    async fn on_error(&self, error: &str) {
        if let Some(pb) = self.take_bar() {
            pb.abandon_with_message(format!("Failed: {}", error));
        }
    }
}
