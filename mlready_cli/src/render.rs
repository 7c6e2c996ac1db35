use std::fmt::Write;

use mlready_core::probe::{CapabilityStatus, ReadinessReport};
use mlready_core::progress::format_bytes;
use mlready_core::{FetchResult, Verdict};

const RULE: &str = "============================================================";

pub fn render_report(report: &ReadinessReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}\n  Workstation readiness\n{}", RULE, RULE);
    for capability in report.iter() {
        let (icon, detail) = match &capability.status {
            CapabilityStatus::Ready(d) => ("✓", d),
            CapabilityStatus::Degraded(d) => ("⚠", d),
            CapabilityStatus::Missing(d) => ("✗", d),
        };
        let _ = writeln!(out, "  {} {}: {}", icon, capability.name, detail);
    }
    out
}

pub fn render_fetch(result: &FetchResult) -> String {
    match result {
        FetchResult::AlreadyPresent { path, size } => format!(
            "✓ {} already present ({})",
            path.display(),
            format_bytes(*size)
        ),
        FetchResult::Downloaded { path, size } => {
            format!("✓ downloaded {} ({})", path.display(), format_bytes(*size))
        }
        FetchResult::Failed(failure) => format!("✗ {}", failure),
    }
}

pub fn render_verdict(verdict: &Verdict) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}\n  Summary\n{}", RULE, RULE);

    if !verdict.errors.is_empty() {
        let _ = writeln!(out, "Errors:");
        for error in &verdict.errors {
            let _ = writeln!(out, "  • {}", error);
        }
    }
    if !verdict.warnings.is_empty() {
        let _ = writeln!(out, "Warnings:");
        for warning in &verdict.warnings {
            let _ = writeln!(out, "  • {}", warning);
        }
    }

    let closing = match (verdict.success, verdict.warnings.is_empty()) {
        (true, true) => "Everything is installed correctly.",
        (true, false) => "Installation works, but check the warnings above.",
        (false, _) => "Installation incomplete.",
    };
    let _ = writeln!(out, "{}", closing);
    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mlready_core::probe::CapabilityKind;

    use super::*;

    #[test]
    fn report_marks_each_state() {
        let mut report = ReadinessReport::new();
        let python = CapabilityStatus::Ready("Python 3.11".into());
        report.insert("python3", CapabilityKind::Runtime, python);
        let cuda = CapabilityStatus::Missing("none".into());
        report.insert("cuda", CapabilityKind::Accelerator, cuda);
        let text = render_report(&report);
        assert!(text.contains("✓ python3: Python 3.11"));
        assert!(text.contains("✗ cuda: none"));
    }

    #[test]
    fn verdict_lists_errors_before_warnings() {
        let verdict = Verdict {
            success: false,
            errors: vec!["CLIP missing".into()],
            warnings: vec!["cuda unavailable".into()],
        };
        let text = render_verdict(&verdict);
        let errors_at = text.find("Errors:").unwrap();
        let warnings_at = text.find("Warnings:").unwrap();
        assert!(errors_at < warnings_at);
        assert!(text.contains("Installation incomplete."));
    }

    #[test]
    fn downloaded_fetch_shows_size() {
        let text = render_fetch(&FetchResult::Downloaded {
            path: PathBuf::from("pretrained_models/model.pt"),
            size: 41_943_040,
        });
        assert_eq!(text, "✓ downloaded pretrained_models/model.pt (40.0 MB)");
    }
}
