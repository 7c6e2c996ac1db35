pub mod artifact_fetcher;
pub mod path_locks;
mod transfer;

pub use artifact_fetcher::{leftover_parts, ArtifactFetcher};
