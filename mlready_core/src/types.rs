use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use reqwest::Url;
use serde::Serialize;
use thiserror::Error;

/// Immutable description of one fetchable artifact.
///
/// Built through [`ArtifactSpec::new`], which rejects anything that is not an
/// HTTP(S) URL and destinations without a file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSpec {
    name: String,
    url: String,
    destination: PathBuf,
    minimum_size: Option<u64>,
}

impl ArtifactSpec {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, FetchError> {
        let url = url.into();
        let parsed = Url::parse(&url)
            .map_err(|e| FetchError::InvalidSpec(format!("invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidSpec(format!(
                "unsupported URL scheme '{}' in '{}'",
                parsed.scheme(),
                url
            )));
        }

        let destination = destination.into();
        if destination.file_name().is_none() {
            return Err(FetchError::InvalidSpec(format!(
                "destination '{}' does not name a file",
                destination.display()
            )));
        }

        Ok(Self {
            name: name.into(),
            url,
            destination,
            minimum_size: None,
        })
    }

    /// Files at or below this many bytes are treated as truncated stubs.
    pub fn with_minimum_size(mut self, bytes: u64) -> Self {
        self.minimum_size = Some(bytes);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn minimum_size(&self) -> Option<u64> {
        self.minimum_size
    }

    /// Directory the artifact (and its temporary file) lives in.
    pub fn destination_dir(&self) -> &Path {
        match self.destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Whether an existing file of `size` bytes can be trusted as complete.
    ///
    /// Without a threshold any non-empty file is accepted.
    pub fn is_plausible(&self, size: u64) -> bool {
        size > self.minimum_size.unwrap_or(0)
    }
}

/// Cumulative transfer state, owned and advanced by the fetcher only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub bytes_transferred: u64,
    /// Expected size from `content-length`; `0` when the server sent none.
    pub total_bytes: u64,
    pub updated_at: Instant,
}

impl FetchProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
            updated_at: Instant::now(),
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
        self.updated_at = Instant::now();
    }
}

/// Why the fetcher decided to go to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FetchReason {
    Missing,
    BelowThreshold { size: u64, minimum: u64 },
}

impl fmt::Display for FetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchReason::Missing => write!(f, "artifact not found"),
            FetchReason::BelowThreshold { size, minimum } => write!(
                f,
                "existing file is only {} bytes (expected more than {}), assuming it is truncated",
                size, minimum
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server responded with HTTP {0}")]
    HttpStatus(u16),

    #[error("filesystem error at {}: {message}", path.display())]
    Filesystem { path: PathBuf, message: String },

    #[error("download cancelled")]
    Cancelled,

    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("invalid artifact spec: {0}")]
    InvalidSpec(String),
}

impl FetchError {
    pub fn filesystem(path: &Path, err: std::io::Error) -> Self {
        FetchError::Filesystem {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Transient failures that a fresh attempt may cure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::SizeMismatch { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::HttpStatus(status.as_u16()),
            None => FetchError::Network(err.to_string()),
        }
    }
}

/// A failed provisioning attempt, with enough context to tell the user what
/// to download by hand and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub artifact: String,
    pub url: String,
    pub destination: PathBuf,
    pub error: FetchError,
}

impl FetchFailure {
    pub fn new(spec: &ArtifactSpec, error: FetchError) -> Self {
        Self {
            artifact: spec.name().to_string(),
            url: spec.url().to_string(),
            destination: spec.destination().to_path_buf(),
            error,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not provision '{}' ({}). Download it manually from {} and place it at {}",
            self.artifact,
            self.error,
            self.url,
            self.destination.display()
        )
    }
}

/// Outcome of one `ensure` call. Produced exactly once per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchResult {
    AlreadyPresent { path: PathBuf, size: u64 },
    Downloaded { path: PathBuf, size: u64 },
    Failed(FetchFailure),
}

impl FetchResult {
    /// The artifact is at its destination after this call.
    pub fn is_ready(&self) -> bool {
        !matches!(self, FetchResult::Failed(_))
    }

    pub fn failure(&self) -> Option<&FetchFailure> {
        match self {
            FetchResult::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}
