use async_trait::async_trait;

use super::snapshot::ProgressSnapshot;
use crate::types::{FetchError, FetchProgress, FetchReason};

/// Trait for anything that wants to observe an artifact transfer.
///
/// The `ProgressNotifier` calls these methods, in order, on all registered
/// observers:
/// - `on_start` once, before the first request, with the reason for fetching.
/// - `on_progress` after every chunk written to disk.
/// - `on_retry` when an attempt failed and another one is about to start.
///   Byte counts seen by `on_progress` never decrease, even across retries.
/// - exactly one of `on_complete` (artifact in place) or `on_error`, also
///   when the `ensure` future is dropped mid-transfer.
///
/// Nothing is called when the artifact was already present.
#[async_trait]
pub trait ProgressObserver: Send + Sync + 'static {
    async fn on_start(&self, _reason: &FetchReason) {}

    async fn on_progress(&self, snapshot: &ProgressSnapshot);

    async fn on_retry(&self, _attempt: u32, _error: &FetchError) {}

    async fn on_complete(&self, snapshot: &ProgressSnapshot);

    async fn on_error(&self, error: &str);
}

/// Adapts a plain `Fn(&FetchProgress)` into an observer.
pub struct CallbackObserver<F> {
    callback: F,
}

impl<F> CallbackObserver<F>
where
    F: Fn(&FetchProgress) + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> ProgressObserver for CallbackObserver<F>
where
    F: Fn(&FetchProgress) + Send + Sync + 'static,
{
    async fn on_progress(&self, snapshot: &ProgressSnapshot) {
        (self.callback)(&snapshot.progress);
    }

    async fn on_complete(&self, _snapshot: &ProgressSnapshot) {}

    async fn on_error(&self, _error: &str) {}
}
