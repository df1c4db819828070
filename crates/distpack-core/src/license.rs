//! Third-party dependency license collection.
//!
//! Dependencies are re-resolved from scratch inside the snapshot and the
//! license-scanning tool runs in "cache" mode against them. The resulting
//! cache directory is copied into the package metadata.
//!
//! Known limitation: collection runs on a single host, so license data for
//! platform-specific dependencies reflects that host only.

use crate::config::LicenseConfig;
use crate::context::ExecContext;
use crate::error::{PackageError, Result};
use crate::runner::{CommandSpec, Invocation, ToolRunner};
use crate::snapshot::copy_dir_all;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// The license-scanning tool and the dependency bootstrap it relies on.
#[async_trait]
pub trait LicenseScanner: Send + Sync {
    /// Resolve and install dependencies in `ctx.cwd()`.
    async fn resolve_dependencies(&self, ctx: &ExecContext) -> Result<()>;

    /// Write per-dependency license records into the cache directory.
    async fn cache(&self, ctx: &ExecContext) -> Result<()>;
}

/// [`LicenseScanner`] that runs configured commands.
#[derive(Debug, Clone)]
pub struct CommandLicenseScanner {
    bootstrap: CommandSpec,
    scan: CommandSpec,
    runner: ToolRunner,
}

impl CommandLicenseScanner {
    pub fn new(bootstrap: CommandSpec, scan: CommandSpec, runner: ToolRunner) -> Self {
        Self {
            bootstrap,
            scan,
            runner,
        }
    }

    pub fn from_config(config: &LicenseConfig, runner: ToolRunner) -> Self {
        Self::new(config.bootstrap.clone(), config.scan.clone(), runner)
    }
}

#[async_trait]
impl LicenseScanner for CommandLicenseScanner {
    async fn resolve_dependencies(&self, ctx: &ExecContext) -> Result<()> {
        self.runner
            .run_checked(
                &Invocation::from(&self.bootstrap),
                ctx,
                PackageError::LicenseCollection,
            )
            .await
            .map(|_| ())
    }

    async fn cache(&self, ctx: &ExecContext) -> Result<()> {
        self.runner
            .run_checked(
                &Invocation::from(&self.scan),
                ctx,
                PackageError::LicenseCollection,
            )
            .await
            .map(|_| ())
    }
}

/// Runs the scanner against a snapshot and copies its cache into `meta/`.
pub struct LicenseCollector {
    scanner: Arc<dyn LicenseScanner>,
    config: LicenseConfig,
}

impl LicenseCollector {
    pub fn new(scanner: Arc<dyn LicenseScanner>, config: LicenseConfig) -> Self {
        Self { scanner, config }
    }

    /// Isolated context for dependency resolution inside `snapshot_dir`.
    ///
    /// Inherited tool-version overrides and lock-state variables are cleared.
    pub fn context(&self, snapshot_dir: &Path) -> ExecContext {
        ExecContext::new(snapshot_dir).without_vars(self.config.cleared_env.iter().cloned())
    }

    /// Collect license data and return the copied cache directory.
    pub async fn collect(&self, snapshot_dir: &Path, meta_dir: &Path) -> Result<PathBuf> {
        self.clear_lock_state(snapshot_dir)?;

        let ctx = self.context(snapshot_dir);
        info!(snapshot = %snapshot_dir.display(), "Resolving dependencies");
        self.scanner.resolve_dependencies(&ctx).await?;

        info!("Caching dependency licenses");
        self.scanner.cache(&ctx).await?;

        let source = snapshot_dir.join(&self.config.cache_dir);
        if !source.is_dir() {
            return Err(PackageError::LicenseCollection(format!(
                "license scan produced no cache directory at {}",
                source.display()
            )));
        }

        let dest = meta_dir.join(&self.config.cache_dir);
        copy_dir_all(&source, &dest).map_err(|e| {
            PackageError::LicenseCollection(format!(
                "failed to copy license cache to {}: {e}",
                dest.display()
            ))
        })?;
        debug!(dest = %dest.display(), "License cache copied");
        Ok(dest)
    }

    /// Remove lockfiles a checkout may have brought back.
    fn clear_lock_state(&self, snapshot_dir: &Path) -> Result<()> {
        for name in &self.config.lockfiles {
            let path = snapshot_dir.join(name);
            if path.is_file() {
                debug!(path = %path.display(), "Removing dependency lockfile");
                std::fs::remove_file(&path).map_err(|e| {
                    PackageError::LicenseCollection(format!(
                        "failed to remove {}: {e}",
                        path.display()
                    ))
                })?;
            }
        }
        Ok(())
    }
}
