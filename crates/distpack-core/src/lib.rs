//! distpack-core - versioned release packaging
//!
//! Turns a source tree into a self-contained, versioned archive:
//! - Snapshots the tree into a private workspace and pins it to a reference
//! - Compiles a standalone executable with an external toolchain
//! - Collects third-party license data and static project metadata
//! - Checks the package shape and writes `pkg/<version>/<name>-<version>-<platform>-x64.tar.gz`
//!
//! External systems sit behind the [`VersionControl`], [`Compiler`],
//! [`LicenseScanner`], and [`AssetFetcher`] traits; [`fakes`] has in-memory
//! doubles for each.

pub mod archive;
pub mod compiler;
pub mod config;
pub mod context;
mod error;
pub mod fakes;
pub mod license;
pub mod manifest;
pub mod metadata;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod snapshot;
pub mod stage;
pub mod telemetry;
pub mod vcs;
pub mod workspace;

// Re-export key types
pub use archive::{archive_path, host_platform, ArchiveBuilder, ArchiveSummary};
pub use compiler::{CompileRequest, Compiler, ToolchainCompiler, ToolchainConfig};
pub use config::{LicenseConfig, MetadataConfig, PackageConfig};
pub use context::ExecContext;
pub use error::{PackageError, Result};
pub use license::{CommandLicenseScanner, LicenseCollector, LicenseScanner};
pub use manifest::{ManifestExpectations, PackageManifest};
pub use metadata::{AssetFetcher, HttpFetcher, MetadataAssembler};
pub use pipeline::{BuildRequest, Collaborators, PackagePipeline};
pub use report::PackageReport;
pub use runner::{CommandSpec, ToolRunner};
pub use snapshot::{snapshot, ExcludeSet, SnapshotStats};
pub use stage::Stage;
pub use vcs::{pin, CheckoutGuard, GitVersionControl, VersionControl};
pub use workspace::Workspace;
