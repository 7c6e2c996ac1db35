//! Workstation readiness checks and artifact provisioning.
//!
//! The crate has two independent halves that a front end wires together:
//!
//! - [`probe`] inspects the environment and produces a [`ReadinessReport`].
//! - [`fetcher`] makes sure a large artifact exists at a destination path,
//!   streaming it over HTTP(S) when absent or implausibly small.
//!
//! [`readiness::aggregate`] folds both results into a single verdict.

pub mod config;
pub mod fetcher;
pub mod probe;
pub mod progress;
pub mod readiness;
pub mod types;

pub use config::{FetchConfig, ProbeConfig};
pub use fetcher::artifact_fetcher::ArtifactFetcher;
pub use probe::{CapabilityProber, ReadinessReport};
pub use readiness::{aggregate, Verdict};
pub use types::{ArtifactSpec, FetchError, FetchFailure, FetchProgress, FetchReason, FetchResult};
