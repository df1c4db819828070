//! Packaging run orchestration.
//!
//! A run validates its inputs, acquires a workspace, snapshots the source
//! tree, pins the snapshot to the requested version, and then compiles,
//! collects licenses, assembles metadata, checks the manifest, and writes the
//! archive. The reference is restored and the workspace released on every
//! exit path; the first error wins.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::archive::{archive_path, host_platform, ArchiveBuilder, ArchiveSummary};
use crate::compiler::{compile_executable, Compiler, ToolchainCompiler, ToolchainConfig};
use crate::config::{is_single_component, PackageConfig};
use crate::context::ExecContext;
use crate::error::{PackageError, Result};
use crate::license::{CommandLicenseScanner, LicenseCollector, LicenseScanner};
use crate::manifest::{ManifestExpectations, PackageManifest};
use crate::metadata::{AssetFetcher, HttpFetcher, MetadataAssembler};
use crate::report::PackageReport;
use crate::runner::ToolRunner;
use crate::snapshot::{snapshot, ExcludeSet};
use crate::stage::Stage;
use crate::vcs::{pin, GitVersionControl, VersionControl};
use crate::workspace::Workspace;

/// Inputs of one packaging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Compiler toolchain executable.
    pub compiler: PathBuf,

    /// Reference to package; the source tree's current reference when unset.
    pub version: Option<String>,
}

impl BuildRequest {
    pub fn new(compiler: impl Into<PathBuf>, version: Option<String>) -> Self {
        Self {
            compiler: compiler.into(),
            version,
        }
    }
}

/// External systems a run talks to.
pub struct Collaborators {
    pub vcs: Arc<dyn VersionControl>,
    pub scanner: Arc<dyn LicenseScanner>,
    pub fetcher: Arc<dyn AssetFetcher>,

    /// Overrides the toolchain built from [`BuildRequest::compiler`].
    pub compiler: Option<Arc<dyn Compiler>>,
}

impl Collaborators {
    /// git, the configured scanner commands, and an HTTP fetcher.
    pub fn real(config: &PackageConfig) -> Result<Self> {
        let runner = ToolRunner::new(config.timeout_secs);
        Ok(Self {
            vcs: Arc::new(GitVersionControl::new()),
            scanner: Arc::new(CommandLicenseScanner::from_config(&config.license, runner)),
            fetcher: Arc::new(HttpFetcher::new(config.timeout_secs)?),
            compiler: None,
        })
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }
}

/// Runs packaging stages in order for one configuration.
pub struct PackagePipeline {
    config: PackageConfig,
    collaborators: Collaborators,
    runner: ToolRunner,
}

impl PackagePipeline {
    pub fn new(config: PackageConfig, collaborators: Collaborators) -> Self {
        let runner = ToolRunner::new(config.timeout_secs);
        Self {
            config,
            collaborators,
            runner,
        }
    }

    pub fn config(&self) -> &PackageConfig {
        &self.config
    }

    /// Build the archive for `request`.
    pub async fn run(&self, request: &BuildRequest) -> Result<PackageReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("package", run_id = %run_id, name = %self.config.name);
        self.run_inner(request, run_id).instrument(span).await
    }

    async fn run_inner(&self, request: &BuildRequest, run_id: String) -> Result<PackageReport> {
        let start = Instant::now();
        info!(compiler = %request.compiler.display(), "Starting packaging run");

        let (compiler, version) = staged(Stage::Configure, async {
            let compiler = validate_compiler(&request.compiler)?;
            self.config.validate()?;
            let version = match &request.version {
                Some(v) => v.clone(),
                None => self.collaborators.vcs.current_ref(&self.config.source_root)?,
            };
            validate_version(&version)?;
            Ok::<_, PackageError>((compiler, version))
        })
        .await?;

        let workspace = staged(Stage::Workspace, async {
            Workspace::acquire(self.config.temp_root.as_deref())
        })
        .await?;

        let outcome = self.package_in(&workspace, &compiler, &version).await;
        let released = workspace.release();
        let (summary, entries, platform) = match (outcome, released) {
            (Ok(built), Ok(())) => built,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Err(cleanup)) => {
                warn!(error = %cleanup, "Workspace cleanup also failed");
                return Err(e);
            }
            (Err(e), Ok(())) => return Err(e),
        };

        let report = PackageReport {
            run_id,
            name: self.config.name.clone(),
            version,
            platform,
            archive: summary.path,
            sha256: summary.sha256,
            size_bytes: summary.size_bytes,
            entries,
            duration_ms: start.elapsed().as_millis() as u64,
            built_at: Utc::now(),
        };
        info!(
            archive = %report.archive.display(),
            sha256 = %report.sha256,
            duration_ms = report.duration_ms,
            "Packaging run complete"
        );
        Ok(report)
    }

    /// Snapshot, pin, and build; restores the reference before returning.
    async fn package_in(
        &self,
        workspace: &Workspace,
        compiler: &Path,
        version: &str,
    ) -> Result<(ArchiveSummary, usize, String)> {
        let excludes = ExcludeSet::new(self.config.excludes.iter().cloned());
        staged(Stage::Snapshot, async {
            snapshot(&self.config.source_root, workspace.copy_dir(), &excludes)
        })
        .await?;

        let guard = staged(Stage::Checkout, async {
            pin(self.collaborators.vcs.clone(), workspace.copy_dir(), version)
        })
        .await?;

        let built = self.build_pinned(workspace, compiler, version).await;
        let restored = guard.restore();
        match (built, restored) {
            (Ok(built), Ok(())) => Ok(built),
            (Ok((summary, _, _)), Err(e)) => {
                // A run that reports failure leaves no archive behind
                if let Err(rm) = std::fs::remove_file(&summary.path) {
                    warn!(archive = %summary.path.display(), error = %rm, "Failed to remove archive");
                }
                Err(e)
            }
            (Err(e), Err(restore)) => {
                warn!(error = %restore, "Reference restore also failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn build_pinned(
        &self,
        workspace: &Workspace,
        compiler_path: &Path,
        version: &str,
    ) -> Result<(ArchiveSummary, usize, String)> {
        let config = &self.config;
        let snapshot_dir = workspace.copy_dir();
        let build_dir = workspace.build_dir();
        let meta_dir = workspace.meta_dir();

        let compiler: Arc<dyn Compiler> = match &self.collaborators.compiler {
            Some(compiler) => compiler.clone(),
            None => Arc::new(ToolchainCompiler::new(compiler_path, self.runner)),
        };

        staged(Stage::Compile, async {
            let ctx = ExecContext::new(snapshot_dir);
            let toolchain =
                ToolchainConfig::detect(&self.runner, &ctx, config.cert_dir.as_deref()).await;
            compile_executable(
                compiler.as_ref(),
                &config.entry_point(),
                build_dir,
                &config.name,
                &toolchain,
                &ctx,
            )
            .await
        })
        .await?;

        staged(Stage::Licenses, async {
            LicenseCollector::new(self.collaborators.scanner.clone(), config.license.clone())
                .collect(snapshot_dir, &meta_dir)
                .await
        })
        .await?;

        staged(Stage::Metadata, async {
            MetadataAssembler::new(self.collaborators.fetcher.clone(), config.metadata.clone())
                .assemble(snapshot_dir, &meta_dir)
                .await
        })
        .await?;

        let manifest = staged(Stage::Manifest, async {
            PackageManifest::inspect(build_dir, &ManifestExpectations::from_config(config))
        })
        .await?;

        let platform = host_platform();
        let target = archive_path(config.output_root(), &config.name, version, &platform);
        let summary = staged(Stage::Archive, async {
            ArchiveBuilder::build(build_dir, &manifest, &target)
        })
        .await?;

        Ok((summary, manifest.len(), platform))
    }
}

/// Run `work` inside a span for `stage`, logging start and outcome.
async fn staged<T, F>(stage: Stage, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let span = info_span!("stage", stage = %stage);
    async move {
        let start = Instant::now();
        info!("Stage started");
        let result = work.await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(duration_ms, "Stage finished"),
            Err(e) => error!(duration_ms, error = %e, "Stage failed"),
        }
        result
    }
    .instrument(span)
    .await
}

/// Check that `path` names a readable regular file and canonicalize it.
pub fn validate_compiler(path: &Path) -> Result<PathBuf> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        PackageError::Configuration(format!("compiler {} not found: {e}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(PackageError::Configuration(format!(
            "compiler {} is not a regular file",
            path.display()
        )));
    }
    std::fs::File::open(path).map_err(|e| {
        PackageError::Configuration(format!("compiler {} is not readable: {e}", path.display()))
    })?;
    path.canonicalize().map_err(|e| {
        PackageError::Configuration(format!("cannot resolve compiler {}: {e}", path.display()))
    })
}

/// Versions become a directory name and a checkout argument.
pub fn validate_version(version: &str) -> Result<()> {
    if version.trim().is_empty() {
        return Err(PackageError::Configuration(
            "version must not be empty".to_string(),
        ));
    }
    if !is_single_component(version) {
        return Err(PackageError::Configuration(format!(
            "version '{version}' must not contain path separators"
        )));
    }
    if version.starts_with('-') {
        return Err(PackageError::Configuration(format!(
            "version '{version}' must not start with '-'"
        )));
    }
    Ok(())
}
