use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use scopeguard::ScopeGuard;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::path_locks::PathLocks;
use super::transfer::write_stream;
use crate::config::FetchConfig;
use crate::progress::{ProgressEvent, ProgressNotifier, ProgressObserver};
use crate::types::{ArtifactSpec, FetchError, FetchFailure, FetchReason, FetchResult};

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// What the pre-flight check found at the destination.
enum Existing {
    Absent,
    Plausible(u64),
    TooSmall(u64),
}

/// Makes sure an artifact exists at its destination, downloading it when it
/// is missing or implausibly small.
///
/// Downloads land in a `.part` file next to the destination and are renamed
/// into place only once the whole body is on disk, so the destination never
/// holds a partial artifact.
pub struct ArtifactFetcher {
    client: Client,
    config: FetchConfig,
    observers: Vec<Arc<dyn ProgressObserver>>,
    locks: PathLocks,
    cancel_token: CancellationToken,
}

impl ArtifactFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            observers: Vec::new(),
            locks: PathLocks::new(),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Register an observer for every fetch made by this fetcher.
    pub fn add_observer(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Cancel in-flight and future fetches. A stopped fetcher stays stopped.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub async fn ensure(&self, spec: &ArtifactSpec) -> FetchResult {
        self.run(spec, None).await
    }

    /// Like [`ensure`](Self::ensure), with one extra observer for this call only.
    pub async fn ensure_with(
        &self,
        spec: &ArtifactSpec,
        observer: Arc<dyn ProgressObserver>,
    ) -> FetchResult {
        self.run(spec, Some(observer)).await
    }

    async fn run(
        &self,
        spec: &ArtifactSpec,
        extra: Option<Arc<dyn ProgressObserver>>,
    ) -> FetchResult {
        match self.ensure_inner(spec, extra).await {
            Ok(result) => result,
            Err(error) => {
                log::error!(
                    "[ensure] {}: giving up on {} -> {}: {}",
                    spec.name(),
                    spec.url(),
                    spec.destination().display(),
                    error
                );
                FetchResult::Failed(FetchFailure::new(spec, error))
            }
        }
    }

    async fn ensure_inner(
        &self,
        spec: &ArtifactSpec,
        extra: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<FetchResult, FetchError> {
        let _path_guard = self.locks.acquire(spec.destination()).await;

        let reason = match inspect_existing(spec).await? {
            Existing::Plausible(size) => {
                log::info!(
                    "[ensure] {}: already present at {} ({} bytes)",
                    spec.name(),
                    spec.destination().display(),
                    size
                );
                return Ok(FetchResult::AlreadyPresent {
                    path: spec.destination().to_path_buf(),
                    size,
                });
            }
            Existing::Absent => FetchReason::Missing,
            Existing::TooSmall(size) => FetchReason::BelowThreshold {
                size,
                minimum: spec.minimum_size().unwrap_or(0),
            },
        };
        log::warn!(
            "[ensure] {}: downloading from {} ({})",
            spec.name(),
            spec.url(),
            reason
        );

        tokio::fs::create_dir_all(spec.destination_dir())
            .await
            .map_err(|e| FetchError::filesystem(spec.destination_dir(), e))?;

        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let mut notifier = ProgressNotifier::new();
        for observer in self.observers.iter().chain(extra.iter()) {
            notifier.add_observer(Arc::clone(observer));
        }
        let notifier_handle = tokio::spawn(notifier.run(progress_rx));

        let _ = progress_tx.send(ProgressEvent::Started(reason)).await;
        let outcome = self.download_with_retries(spec, &progress_tx).await;
        let last_event = match &outcome {
            Ok(_) => ProgressEvent::Completed,
            Err(error) => ProgressEvent::Failed(error.to_string()),
        };
        let _ = progress_tx.send(last_event).await;

        drop(progress_tx);
        let _ = notifier_handle.await;

        let size = outcome?;
        log::info!(
            "[ensure] {}: downloaded {} bytes to {}",
            spec.name(),
            size,
            spec.destination().display()
        );
        if !spec.is_plausible(size) {
            log::warn!(
                "[ensure] {}: downloaded file is only {} bytes, below the {} byte threshold",
                spec.name(),
                size,
                spec.minimum_size().unwrap_or(0)
            );
        }

        Ok(FetchResult::Downloaded {
            path: spec.destination().to_path_buf(),
            size,
        })
    }

    async fn download_with_retries(
        &self,
        spec: &ArtifactSpec,
        progress_tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<u64, FetchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            match self.download_once(spec, progress_tx).await {
                Ok(size) => return Ok(size),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.backoff_for(attempt);
                    log::warn!(
                        "[download] {}: attempt {}/{} failed: {}; retrying in {:?}",
                        spec.name(),
                        attempt,
                        max_attempts,
                        error,
                        delay
                    );
                    let _ = progress_tx
                        .send(ProgressEvent::Retrying { attempt, error })
                        .await;

                    tokio::select! {
                        _ = self.cancel_token.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One attempt, bounded by the total timeout.
    async fn download_once(
        &self,
        spec: &ArtifactSpec,
        progress_tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<u64, FetchError> {
        let attempt = self.request_and_place(spec, progress_tx);
        match tokio::time::timeout(self.config.total_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Network(format!(
                "timed out after {:?}",
                self.config.total_timeout
            ))),
        }
    }

    async fn request_and_place(
        &self,
        spec: &ArtifactSpec,
        progress_tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<u64, FetchError> {
        let stall_timeout = self.config.stall_timeout;
        let request = self.client.get(spec.url()).send();
        let response = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Err(FetchError::Cancelled),
            response = tokio::time::timeout(stall_timeout, request) => match response {
                Ok(response) => response?,
                Err(_) => {
                    return Err(FetchError::Network(format!(
                        "stalled: no response headers within {:?}",
                        stall_timeout
                    )))
                }
            },
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let expected = response.content_length();
        log::debug!(
            "[download] {}: status={}, content_length={:?}",
            spec.name(),
            status,
            expected
        );

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FetchError::from));
        self.place(spec, body, expected, progress_tx).await
    }

    /// Writes `body` to a temporary file beside the destination and renames
    /// it over the destination once complete. The temporary file is removed
    /// on every other exit, including when this future is dropped.
    pub(crate) async fn place<S>(
        &self,
        spec: &ArtifactSpec,
        body: S,
        expected: Option<u64>,
        progress_tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<u64, FetchError>
    where
        S: Stream<Item = Result<Bytes, FetchError>> + Unpin,
    {
        let temp_path = scopeguard::guard(temp_path_for(spec), |path| {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("[place] could not remove {}: {}", path.display(), e);
                }
            }
        });

        let file = tokio::fs::File::create(&*temp_path)
            .await
            .map_err(|e| FetchError::filesystem(&temp_path, e))?;

        let written = write_stream(
            body,
            file,
            &temp_path,
            expected,
            self.config.stall_timeout,
            &self.cancel_token,
            progress_tx,
        )
        .await?;

        tokio::fs::rename(&*temp_path, spec.destination())
            .await
            .map_err(|e| FetchError::filesystem(spec.destination(), e))?;
        // Renamed into place; nothing left to clean up.
        let _ = ScopeGuard::into_inner(temp_path);

        Ok(written)
    }
}

async fn inspect_existing(spec: &ArtifactSpec) -> Result<Existing, FetchError> {
    match tokio::fs::metadata(spec.destination()).await {
        Ok(meta) if meta.is_dir() => Err(FetchError::Filesystem {
            path: spec.destination().to_path_buf(),
            message: "destination is a directory".to_string(),
        }),
        Ok(meta) if spec.is_plausible(meta.len()) => Ok(Existing::Plausible(meta.len())),
        Ok(meta) => Ok(Existing::TooSmall(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Existing::Absent),
        Err(e) => Err(FetchError::filesystem(spec.destination(), e)),
    }
}

/// `.model.bin.<uuid>.part` in the destination's directory, so the final
/// rename never crosses filesystems.
fn temp_path_for(spec: &ArtifactSpec) -> PathBuf {
    let file_name = spec
        .destination()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    spec.destination_dir()
        .join(format!(".{}.{}.part", file_name, Uuid::new_v4()))
}

/// Temporary files left in `dir` by this fetcher.
pub fn leftover_parts(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_part = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.') && name.ends_with(".part"));
        if is_part {
            parts.push(path);
        }
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn spec_in(dir: &Path) -> ArtifactSpec {
        ArtifactSpec::new(
            "model",
            "https://example.invalid/model.bin",
            dir.join("models").join("model.bin"),
        )
        .unwrap()
        .with_minimum_size(100)
    }

    fn body_failing_at(offset: usize, total: usize) -> Vec<Result<Bytes, FetchError>> {
        let mut items = Vec::new();
        let mut sent = 0;
        while sent < offset {
            let n = (offset - sent).min(64);
            items.push(Ok(Bytes::from(vec![1u8; n])));
            sent += n;
        }
        items.push(Err(FetchError::Network(format!(
            "reset at {} of {}",
            offset, total
        ))));
        items
    }

    #[test]
    fn temp_path_is_hidden_sibling() {
        let spec = ArtifactSpec::new("m", "https://example.invalid/m.bin", "models/m.bin").unwrap();
        let path = temp_path_for(&spec);
        assert_eq!(path.parent().unwrap(), Path::new("models"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".m.bin."));
        assert!(name.ends_with(".part"));
    }

    #[tokio::test]
    async fn failure_at_any_offset_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec_in(dir.path());
        std::fs::create_dir_all(spec.destination_dir()).unwrap();
        let fetcher = ArtifactFetcher::new(FetchConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        drop(rx);

        for offset in [0, 1, 63, 64, 65, 300, 511] {
            let body = stream::iter(body_failing_at(offset, 512));
            let err = fetcher
                .place(&spec, body, Some(512), &tx)
                .await
                .unwrap_err();
            assert!(matches!(err, FetchError::Network(_)), "offset {}", offset);
            assert!(!spec.destination().exists(), "offset {}", offset);
            assert!(
                leftover_parts(spec.destination_dir()).unwrap().is_empty(),
                "offset {}",
                offset
            );
        }
    }

    #[tokio::test]
    async fn failure_keeps_pristine_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec_in(dir.path());
        std::fs::create_dir_all(spec.destination_dir()).unwrap();
        std::fs::write(spec.destination(), b"stub").unwrap();
        let fetcher = ArtifactFetcher::new(FetchConfig::default()).unwrap();
        let (tx, _rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let body = stream::iter(body_failing_at(200, 512));
        assert!(fetcher.place(&spec, body, Some(512), &tx).await.is_err());

        assert_eq!(std::fs::read(spec.destination()).unwrap(), b"stub");
        assert!(leftover_parts(spec.destination_dir()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_placement_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec_in(dir.path());
        std::fs::create_dir_all(spec.destination_dir()).unwrap();
        let fetcher = ArtifactFetcher::new(FetchConfig::default()).unwrap();
        let (tx, _rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let body = stream::iter(vec![Ok(Bytes::from(vec![0u8; 32]))]).chain(stream::pending());
        let placement = fetcher.place(&spec, body, None, &tx);
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(100), placement).await;
        assert!(timed_out.is_err());

        assert!(!spec.destination().exists());
        assert!(leftover_parts(spec.destination_dir()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_placement_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec_in(dir.path());
        std::fs::create_dir_all(spec.destination_dir()).unwrap();
        let fetcher = ArtifactFetcher::new(FetchConfig::default()).unwrap();
        let (tx, _rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let body = stream::iter(vec![
            Ok(Bytes::from(vec![1u8; 150])),
            Ok(Bytes::from(vec![2u8; 50])),
        ]);
        let written = fetcher.place(&spec, body, Some(200), &tx).await.unwrap();

        assert_eq!(written, 200);
        assert_eq!(std::fs::metadata(spec.destination()).unwrap().len(), 200);
        assert!(leftover_parts(spec.destination_dir()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn directory_at_destination_is_a_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec_in(dir.path());
        std::fs::create_dir_all(spec.destination()).unwrap();

        let err = inspect_existing(&spec).await.err().unwrap();
        assert!(matches!(err, FetchError::Filesystem { .. }));
    }
}
