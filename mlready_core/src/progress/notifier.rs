use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::observer::ProgressObserver;
use super::snapshot::ProgressSnapshot;
use crate::types::{FetchError, FetchProgress, FetchReason};

/// EMA smoothing factor. 0.3 = responsive but stable.
const EMA_ALPHA: f64 = 0.3;

/// Messages sent by the fetcher over the progress channel.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started(FetchReason),
    Progress(FetchProgress),
    Retrying { attempt: u32, error: FetchError },
    Completed,
    Failed(String),
}

/// Consumes `ProgressEvent`s from the fetch channel, turns raw byte counts
/// into `ProgressSnapshot`s and fans out to all registered observers.
///
/// # Lifecycle
///
/// | Channel message              | Observer method called          |
/// |------------------------------|---------------------------------|
/// | `Started(reason)`            | `on_start(&reason)`             |
/// | `Progress(progress)`         | `on_progress(&snapshot)`        |
/// | `Retrying { .. }`            | `on_retry(attempt, &error)`     |
/// | `Completed`                  | `on_complete(&final_snapshot)`  |
/// | `Failed(msg)`                | `on_error(&msg)`                |
/// | Channel closed before either | `on_error(..)`                  |
///
/// Reported byte counts never decrease: after a retry, progress from the new
/// attempt is held back until it reaches the furthest count already reported.
pub struct ProgressNotifier {
    observers: Vec<Arc<dyn ProgressObserver>>,
    latest: Option<FetchProgress>,
    high_water: u64,
    speed: f64,
    attempt_started: Instant,
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            latest: None,
            high_water: 0,
            speed: 0.0,
            attempt_started: Instant::now(),
        }
    }

    /// Register an observer. Must be called before `run()`.
    pub fn add_observer(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    /// Consume events until the fetch completes, fails or is abandoned.
    pub async fn run(mut self, mut progress_rx: mpsc::Receiver<ProgressEvent>) {
        while let Some(event) = progress_rx.recv().await {
            match event {
                ProgressEvent::Started(reason) => {
                    self.attempt_started = Instant::now();
                    for observer in &self.observers {
                        observer.on_start(&reason).await;
                    }
                }
                ProgressEvent::Progress(progress) => {
                    let snapshot = self.handle_progress(progress);
                    if snapshot.bytes_transferred < self.high_water {
                        continue;
                    }
                    self.high_water = snapshot.bytes_transferred;
                    for observer in &self.observers {
                        observer.on_progress(&snapshot).await;
                    }
                }
                ProgressEvent::Retrying { attempt, error } => {
                    self.latest = None;
                    self.speed = 0.0;
                    self.attempt_started = Instant::now();
                    for observer in &self.observers {
                        observer.on_retry(attempt, &error).await;
                    }
                }
                ProgressEvent::Completed => {
                    self.finish().await;
                    return;
                }
                ProgressEvent::Failed(error) => {
                    self.fail(&error).await;
                    return;
                }
            }
        }
        // The sender went away without a verdict: the fetch was dropped.
        self.fail("fetch abandoned before completion").await;
    }

    async fn fail(&self, error: &str) {
        for observer in &self.observers {
            observer.on_error(error).await;
        }
    }

    fn handle_progress(&mut self, progress: FetchProgress) -> ProgressSnapshot {
        let (previous_bytes, previous_at) = match self.latest {
            Some(latest) => (latest.bytes_transferred, latest.updated_at),
            None => (0, self.attempt_started),
        };

        let elapsed = progress
            .updated_at
            .saturating_duration_since(previous_at)
            .as_secs_f64();
        if elapsed > 0.0 {
            let delta = progress.bytes_transferred.saturating_sub(previous_bytes);
            let instant_speed = delta as f64 / elapsed;
            self.speed = EMA_ALPHA * instant_speed + (1.0 - EMA_ALPHA) * self.speed;
        }
        self.latest = Some(progress);

        let mut snapshot = ProgressSnapshot::from_progress(progress);
        snapshot.speed = self.speed;
        let remaining = progress.total_bytes.saturating_sub(progress.bytes_transferred);
        if self.speed > 0.0 {
            snapshot.eta_secs = remaining as f64 / self.speed;
        }
        snapshot
    }

    /// Final snapshot with `done = true` and the average rate of the last attempt.
    async fn finish(self) {
        let progress = self.latest.unwrap_or_else(|| FetchProgress::new(0));
        let elapsed = self.attempt_started.elapsed().as_secs_f64();

        let mut snapshot = ProgressSnapshot::from_progress(progress);
        snapshot.done = true;
        if elapsed > 0.0 {
            snapshot.speed = progress.bytes_transferred as f64 / elapsed;
        }

        for observer in &self.observers {
            observer.on_complete(&snapshot).await;
        }
    }
}
