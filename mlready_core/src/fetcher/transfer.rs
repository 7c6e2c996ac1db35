use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressEvent;
use crate::types::{FetchError, FetchProgress};

/// Write buffer between the body stream and the file.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Streams `body` into `file` chunk by chunk and returns the number of bytes
/// written once the data is on disk.
///
/// Cancellation is observed while waiting for every chunk, and a chunk that
/// takes longer than `stall_timeout` to arrive fails the transfer. When
/// `expected` is known, a body of any other length is a `SizeMismatch`.
pub(crate) async fn write_stream<S>(
    mut body: S,
    file: tokio::fs::File,
    path: &Path,
    expected: Option<u64>,
    stall_timeout: Duration,
    cancel_token: &CancellationToken,
    progress_tx: &mpsc::Sender<ProgressEvent>,
) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<Bytes, FetchError>> + Unpin,
{
    let mut writer = tokio::io::BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    let mut progress = FetchProgress::new(expected.unwrap_or(0));

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(FetchError::Cancelled),
            next = tokio::time::timeout(stall_timeout, body.next()) => next,
        };

        let chunk = match next {
            Err(_) => {
                return Err(FetchError::Network(format!(
                    "stalled: no data received for {:?}",
                    stall_timeout
                )))
            }
            Ok(None) => break,
            Ok(Some(chunk)) => chunk?,
        };
        if chunk.is_empty() {
            continue;
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::filesystem(path, e))?;
        progress.advance(chunk.len() as u64);

        // A closed channel only means nobody is listening any more.
        if progress_tx.send(ProgressEvent::Progress(progress)).await.is_err() {
            log::debug!("[write_stream] progress receiver dropped");
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchError::filesystem(path, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| FetchError::filesystem(path, e))?;

    let written = progress.bytes_transferred;
    if let Some(expected) = expected {
        if written != expected {
            log::warn!(
                "[write_stream] {}: body ended after {} of {} bytes",
                path.display(),
                written,
                expected
            );
            return Err(FetchError::SizeMismatch {
                expected,
                actual: written,
            });
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn chunks(sizes: &[usize]) -> Vec<Result<Bytes, FetchError>> {
        sizes.iter().map(|&n| Ok(Bytes::from(vec![7u8; n]))).collect()
    }

    async fn temp_file(dir: &tempfile::TempDir) -> (std::path::PathBuf, tokio::fs::File) {
        let path = dir.path().join("out.part");
        let file = tokio::fs::File::create(&path).await.unwrap();
        (path, file)
    }

    #[tokio::test]
    async fn writes_every_chunk_and_reports_cumulative_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = temp_file(&dir).await;
        let (tx, mut rx) = mpsc::channel(16);

        let written = write_stream(
            stream::iter(chunks(&[10, 0, 20, 5])),
            file,
            &path,
            Some(35),
            Duration::from_secs(5),
            &CancellationToken::new(),
            &tx,
        )
        .await
        .unwrap();
        drop(tx);

        assert_eq!(written, 35);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 35);

        let mut counts = Vec::new();
        while let Some(ProgressEvent::Progress(p)) = rx.recv().await {
            assert_eq!(p.total_bytes, 35);
            counts.push(p.bytes_transferred);
        }
        assert_eq!(counts, vec![10, 30, 35]);
    }

    #[tokio::test]
    async fn unknown_length_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = temp_file(&dir).await;
        let (tx, _rx) = mpsc::channel(16);

        let written = write_stream(
            stream::iter(chunks(&[3, 4])),
            file,
            &path,
            None,
            Duration::from_secs(5),
            &CancellationToken::new(),
            &tx,
        )
        .await
        .unwrap();
        assert_eq!(written, 7);
    }

    #[tokio::test]
    async fn short_body_is_a_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = temp_file(&dir).await;
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let err = write_stream(
            stream::iter(chunks(&[10])),
            file,
            &path,
            Some(20),
            Duration::from_secs(5),
            &CancellationToken::new(),
            &tx,
        )
        .await
        .unwrap_err();
        assert_eq!(err, FetchError::SizeMismatch { expected: 20, actual: 10 });
    }

    #[tokio::test]
    async fn stream_error_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = temp_file(&dir).await;
        let (tx, _rx) = mpsc::channel(16);

        let mut items = chunks(&[8]);
        items.push(Err(FetchError::Network("connection reset".into())));

        let err = write_stream(
            stream::iter(items),
            file,
            &path,
            Some(64),
            Duration::from_secs(5),
            &CancellationToken::new(),
            &tx,
        )
        .await
        .unwrap_err();
        assert_eq!(err, FetchError::Network("connection reset".into()));
    }

    #[tokio::test]
    async fn stalled_stream_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = temp_file(&dir).await;
        let (tx, _rx) = mpsc::channel(16);

        let body = stream::iter(chunks(&[4])).chain(stream::pending());
        let err = write_stream(
            body,
            file,
            &path,
            None,
            Duration::from_millis(50),
            &CancellationToken::new(),
            &tx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Network(msg) if msg.contains("stalled")));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_read() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = temp_file(&dir).await;
        let (tx, _rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let body = stream::iter(chunks(&[4])).chain(stream::pending());
        let err = write_stream(
            body,
            file,
            &path,
            None,
            Duration::from_secs(30),
            &token,
            &tx,
        )
        .await
        .unwrap_err();
        assert_eq!(err, FetchError::Cancelled);
    }
}
