//! Error taxonomy for the packaging pipeline.
//!
//! Every variant is fatal to the run. The orchestrator releases the
//! workspace and restores the snapshot reference before handing the error
//! back, so callers only map it to a message and an exit code.

use crate::stage::Stage;

/// Packaging errors, one per failure kind.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Invalid or missing build inputs (compiler path, version string).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Temporary workspace could not be created or removed.
    #[error("workspace error: {0}")]
    Workspace(String),

    /// Source tree could not be copied into the snapshot.
    #[error("snapshot failed: {0}")]
    Snapshot(String),

    /// Requested version does not name a reference in the repository.
    #[error("version '{version}' could not be resolved: {detail}")]
    VersionResolution { version: String, detail: String },

    /// Version-control command failed for another reason.
    #[error("version control error: {0}")]
    VersionControl(String),

    /// External compiler toolchain failed.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// Dependency resolution or license scan failed.
    #[error("license collection failed: {0}")]
    LicenseCollection(String),

    /// Static asset fetch failed.
    #[error("network fetch failed: {0}")]
    Network(String),

    /// Project metadata files could not be assembled.
    #[error("metadata assembly failed: {0}")]
    Metadata(String),

    /// Build directory does not have the expected package shape.
    #[error("incomplete package manifest: {0}")]
    IncompleteManifest(String),

    /// Archive could not be written.
    #[error("archive failed: {0}")]
    Archive(String),
}

impl PackageError {
    /// Stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            PackageError::Configuration(_) => Stage::Configure,
            PackageError::Workspace(_) => Stage::Workspace,
            PackageError::Snapshot(_) => Stage::Snapshot,
            PackageError::VersionResolution { .. } | PackageError::VersionControl(_) => {
                Stage::Checkout
            }
            PackageError::Compilation(_) => Stage::Compile,
            PackageError::LicenseCollection(_) => Stage::Licenses,
            PackageError::Network(_) | PackageError::Metadata(_) => Stage::Metadata,
            PackageError::IncompleteManifest(_) => Stage::Manifest,
            PackageError::Archive(_) => Stage::Archive,
        }
    }

    /// Process exit code for this failure kind.
    ///
    /// `127` is reserved for configuration errors so wrappers can tell a bad
    /// compiler path apart from a failed build.
    pub fn exit_code(&self) -> u8 {
        match self {
            PackageError::Configuration(_) => 127,
            PackageError::Workspace(_) => 3,
            PackageError::Snapshot(_) => 4,
            PackageError::VersionResolution { .. } => 5,
            PackageError::VersionControl(_) => 6,
            PackageError::Compilation(_) => 7,
            PackageError::LicenseCollection(_) => 8,
            PackageError::Network(_) => 9,
            PackageError::Metadata(_) => 10,
            PackageError::IncompleteManifest(_) => 11,
            PackageError::Archive(_) => 12,
        }
    }
}

/// Result type for packaging operations.
pub type Result<T> = std::result::Result<T, PackageError>;
