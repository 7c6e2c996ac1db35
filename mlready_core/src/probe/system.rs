use std::sync::Arc;

use async_trait::async_trait;

use super::command::{CommandRunner, TokioCommandRunner};
use super::{CapabilityKind, CapabilityProber, CapabilityStatus, ReadinessReport};
use crate::config::{ArtifactCheck, LibraryCheck, ProbeConfig};
use crate::progress::format_bytes;

/// Asks PyTorch for the CUDA runtime it was built against, empty when no
/// device is usable.
const TORCH_CUDA_QUERY: &str =
    "import torch; print(torch.version.cuda if torch.cuda.is_available() else '')";

/// Probes the local interpreter, GPU and artifact directory.
pub struct SystemProber {
    config: ProbeConfig,
    runner: Arc<dyn CommandRunner>,
}

impl SystemProber {
    pub fn new(config: ProbeConfig) -> Self {
        let runner = Arc::new(TokioCommandRunner::new(config.command_timeout));
        Self { config, runner }
    }

    pub fn with_runner(config: ProbeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    async fn probe_runtime(&self) -> CapabilityStatus {
        let args = vec!["--version".to_string()];
        match self.runner.run(&self.config.python, &args).await {
            Some(output) if output.success => CapabilityStatus::Ready(
                output.first_line().unwrap_or("version unknown").to_string(),
            ),
            Some(output) => CapabilityStatus::Missing(
                output
                    .error_line()
                    .unwrap_or("interpreter exited with an error")
                    .to_string(),
            ),
            None => CapabilityStatus::Missing(format!("'{}' not found", self.config.python)),
        }
    }

    /// `nvidia-smi` first; when it finds nothing, PyTorch's own view of CUDA.
    async fn probe_accelerator(&self, runtime_ready: bool) -> CapabilityStatus {
        if let Some((program, args)) = self.config.accelerator_command.split_first() {
            if let Some(output) = self.runner.run(program, args).await {
                if let (true, Some(device)) = (output.success, output.first_line()) {
                    return CapabilityStatus::Ready(device.to_string());
                }
            }
        }

        if runtime_ready {
            if let Some(output) = self.run_python(TORCH_CUDA_QUERY).await {
                let cuda = output.stdout.lines().map(str::trim).find(|l| !l.is_empty());
                if let (true, Some(cuda)) = (output.success, cuda) {
                    return CapabilityStatus::Ready(format!("CUDA {} (reported by PyTorch)", cuda));
                }
            }
        }

        CapabilityStatus::Missing(
            "no CUDA device detected, the CPU will be used (slower)".to_string(),
        )
    }

    async fn probe_library(&self, library: &LibraryCheck) -> CapabilityStatus {
        let import = format!(
            "import {m}; print(getattr({m}, '__version__', ''))",
            m = library.module
        );
        let output = match self.run_python(&import).await {
            Some(output) if output.success => output,
            Some(output) => {
                return CapabilityStatus::Missing(
                    output.error_line().unwrap_or("import failed").to_string(),
                )
            }
            None => return CapabilityStatus::Missing("interpreter unavailable".to_string()),
        };
        let version = output.first_line().unwrap_or("installed").to_string();

        let Some(smoke_test) = &library.smoke_test else {
            return CapabilityStatus::Ready(version);
        };
        let snippet = format!("import {}; {}", library.module, smoke_test);
        match self.run_python(&snippet).await {
            Some(output) if output.success => CapabilityStatus::Ready(version),
            Some(output) => CapabilityStatus::Degraded(format!(
                "{} installed but failed to load: {}",
                version,
                output.error_line().unwrap_or("unknown error")
            )),
            None => CapabilityStatus::Degraded(format!(
                "{} installed but the load check did not finish",
                version
            )),
        }
    }

    async fn run_python(&self, snippet: &str) -> Option<super::CommandOutput> {
        let args = vec!["-c".to_string(), snippet.to_string()];
        self.runner.run(&self.config.python, &args).await
    }
}

/// First plausible candidate wins; an implausible one is reported as degraded.
async fn probe_artifact(check: &ArtifactCheck) -> CapabilityStatus {
    let minimum = check.minimum_size.unwrap_or(0);
    let mut too_small = None;

    for candidate in &check.candidates {
        let Ok(meta) = tokio::fs::metadata(candidate).await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        if meta.len() > minimum {
            return CapabilityStatus::Ready(format!(
                "{} ({})",
                candidate.display(),
                format_bytes(meta.len())
            ));
        }
        too_small.get_or_insert((candidate.clone(), meta.len()));
    }

    match too_small {
        Some((path, size)) => CapabilityStatus::Degraded(format!(
            "{} is only {}, expected more than {}",
            path.display(),
            format_bytes(size),
            format_bytes(minimum)
        )),
        None => CapabilityStatus::Missing(format!("no {} found", check.name)),
    }
}

#[async_trait]
impl CapabilityProber for SystemProber {
    async fn probe(&self) -> ReadinessReport {
        let mut report = ReadinessReport::new();

        let runtime = self.probe_runtime().await;
        let runtime_ready = runtime.is_ready();
        report.insert(&self.config.python, CapabilityKind::Runtime, runtime);

        let accelerator = self.probe_accelerator(runtime_ready).await;
        report.insert("cuda", CapabilityKind::Accelerator, accelerator);

        for library in &self.config.libraries {
            let status = if runtime_ready {
                self.probe_library(library).await
            } else {
                CapabilityStatus::Missing("interpreter unavailable".to_string())
            };
            report.insert(&library.display_name, CapabilityKind::Library, status);
        }

        if let Some(artifact) = &self.config.artifact {
            let status = probe_artifact(artifact).await;
            report.insert(&artifact.name, CapabilityKind::Artifact, status);
        }

        log::debug!("[probe] {} capabilities checked", report.len());
        report
    }
}
