//! Packaging stage identities.

use serde::{Deserialize, Serialize};

/// Stages of a packaging run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Request validation (compiler path, version string).
    Configure,

    /// Temporary build and copy directories.
    Workspace,

    /// Filtered copy of the source tree.
    Snapshot,

    /// Pinning the snapshot to the requested reference.
    Checkout,

    /// Standalone executable build.
    Compile,

    /// Dependency resolution and license cache.
    Licenses,

    /// Runtime license text and project files.
    Metadata,

    /// Build directory shape check.
    Manifest,

    /// Compressed archive under `pkg/`.
    Archive,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 9] = [
        Stage::Configure,
        Stage::Workspace,
        Stage::Snapshot,
        Stage::Checkout,
        Stage::Compile,
        Stage::Licenses,
        Stage::Metadata,
        Stage::Manifest,
        Stage::Archive,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Configure => "configure",
            Stage::Workspace => "workspace",
            Stage::Snapshot => "snapshot",
            Stage::Checkout => "checkout",
            Stage::Compile => "compile",
            Stage::Licenses => "licenses",
            Stage::Metadata => "metadata",
            Stage::Manifest => "manifest",
            Stage::Archive => "archive",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Configure.name(), "configure");
        assert_eq!(Stage::Licenses.name(), "licenses");
        assert_eq!(Stage::Archive.to_string(), "archive");
    }

    #[test]
    fn test_stage_names_unique() {
        let names: std::collections::HashSet<_> = Stage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), Stage::ALL.len());
    }

    #[test]
    fn test_stage_serde_snake_case() {
        let json = serde_json::to_string(&Stage::Checkout).unwrap();
        assert_eq!(json, "\"checkout\"");
    }
}
