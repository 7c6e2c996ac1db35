//! Capability probing.
//!
//! A [`CapabilityProber`] inspects the environment and reports, for every
//! capability the workstation needs, whether it is ready, degraded or
//! missing. Probing has no side effects; [`system::SystemProber`] is the
//! implementation that shells out to the real interpreter and GPU tools.

pub mod command;
pub mod system;

use async_trait::async_trait;
use serde::Serialize;

pub use command::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use system::SystemProber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Runtime,
    Accelerator,
    Library,
    Artifact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum CapabilityStatus {
    Ready(String),
    /// Present, but not fully usable.
    Degraded(String),
    Missing(String),
}

impl CapabilityStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, CapabilityStatus::Ready(_))
    }

    pub fn detail(&self) -> &str {
        match self {
            CapabilityStatus::Ready(d)
            | CapabilityStatus::Degraded(d)
            | CapabilityStatus::Missing(d) => d,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityReport {
    pub name: String,
    pub kind: CapabilityKind,
    pub status: CapabilityStatus,
}

/// Ordered mapping from capability name to its status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    capabilities: Vec<CapabilityReport>,
}

impl ReadinessReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a capability, replacing an earlier entry with the same name.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        kind: CapabilityKind,
        status: CapabilityStatus,
    ) {
        let name = name.into();
        if let Some(existing) = self.capabilities.iter_mut().find(|c| c.name == name) {
            existing.kind = kind;
            existing.status = status;
            return;
        }
        self.capabilities.push(CapabilityReport { name, kind, status });
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityReport> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityReport> {
        self.capabilities.iter()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// True when an artifact capability was probed and is not ready.
    pub fn needs_artifact(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.kind == CapabilityKind::Artifact && !c.status.is_ready())
    }
}

#[async_trait]
pub trait CapabilityProber: Send + Sync {
    async fn probe(&self) -> ReadinessReport;
}
