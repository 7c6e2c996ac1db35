use serde::Serialize;

use crate::types::FetchProgress;

/// Aggregate progress for one artifact transfer, as handed to observers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    #[serde(skip)]
    pub progress: FetchProgress,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Smoothed transfer rate in bytes per second.
    pub speed: f64,
    pub eta_secs: f64,
    pub done: bool,
}

impl ProgressSnapshot {
    pub fn from_progress(progress: FetchProgress) -> Self {
        Self {
            progress,
            bytes_transferred: progress.bytes_transferred,
            total_bytes: progress.total_bytes,
            speed: 0.0,
            eta_secs: 0.0,
            done: false,
        }
    }
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(41_943_040), "40.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
