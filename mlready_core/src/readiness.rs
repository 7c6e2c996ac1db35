use serde::Serialize;

use crate::probe::{CapabilityKind, CapabilityStatus, ReadinessReport};
use crate::types::FetchResult;

/// Final pass/fail decision for the workstation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Folds the probe report and, when a fetch was attempted, its result into a
/// verdict.
///
/// A missing accelerator is only a warning. Missing runtimes, libraries and
/// artifacts are errors; degraded ones are warnings, except for artifacts,
/// where a fetch result (if any) has the last word.
pub fn aggregate(report: &ReadinessReport, fetch: Option<&FetchResult>) -> Verdict {
    let mut verdict = Verdict::default();

    for capability in report.iter() {
        let name = &capability.name;
        match (capability.kind, &capability.status) {
            (_, CapabilityStatus::Ready(_)) => {}
            (CapabilityKind::Accelerator, status) => verdict
                .warnings
                .push(format!("{} unavailable: {}", name, status.detail())),
            (CapabilityKind::Artifact, status) => {
                if fetch.is_none() {
                    verdict
                        .errors
                        .push(format!("{} not provisioned: {}", name, status.detail()));
                }
            }
            (_, CapabilityStatus::Degraded(detail)) => {
                verdict.warnings.push(format!("{}: {}", name, detail))
            }
            (_, CapabilityStatus::Missing(detail)) => {
                verdict.errors.push(format!("{} missing: {}", name, detail))
            }
        }
    }

    if let Some(FetchResult::Failed(failure)) = fetch {
        verdict.errors.push(failure.to_string());
    }

    verdict.success = verdict.errors.is_empty();
    verdict
}
