//! Summary of a successful packaging run.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What was built, where it landed, and how long it took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReport {
    /// Correlates log lines from one run.
    pub run_id: String,

    pub name: String,
    pub version: String,
    pub platform: String,

    /// Final archive location.
    pub archive: PathBuf,

    /// Hex SHA-256 of the archive.
    pub sha256: String,
    pub size_bytes: u64,

    /// Number of entries in the archive, directories included.
    pub entries: usize,

    pub duration_ms: u64,
    pub built_at: DateTime<Utc>,
}

impl PackageReport {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "{} {} ({}) -> {} [{} entries, {} bytes, sha256 {}] in {}ms",
            self.name,
            self.version,
            self.platform,
            self.archive.display(),
            self.entries,
            self.size_bytes,
            self.sha256,
            self.duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackageReport {
        PackageReport {
            run_id: "run-1".to_string(),
            name: "hub".to_string(),
            version: "2.3.0".to_string(),
            platform: "linux".to_string(),
            archive: PathBuf::from("/out/pkg/2.3.0/hub-2.3.0-linux-x64.tar.gz"),
            sha256: "ab".repeat(32),
            size_bytes: 4096,
            entries: 7,
            duration_ms: 1200,
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_report_serializes_archive_path() {
        let report = sample();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["archive"], "/out/pkg/2.3.0/hub-2.3.0-linux-x64.tar.gz");
        assert_eq!(json["entries"], 7);

        let back: PackageReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_summary_names_archive() {
        let line = sample().summary();
        assert!(line.starts_with("hub 2.3.0 (linux)"));
        assert!(line.contains("hub-2.3.0-linux-x64.tar.gz"));
    }
}
