//! Version-control integration for pinning a snapshot to a reference.

use crate::context::ExecContext;
use crate::error::{PackageError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Version-control operations the pipeline needs.
///
/// Calls are synchronous: they are short, and [`CheckoutGuard`] must be able
/// to restore from `Drop`.
pub trait VersionControl: Send + Sync {
    /// Name of the reference currently checked out in `repo`.
    fn current_ref(&self, repo: &Path) -> Result<String>;

    /// Whether `reference` resolves to a commit in `repo`.
    fn ref_exists(&self, repo: &Path, reference: &str) -> Result<bool>;

    /// Check out `reference` in `repo`.
    fn checkout(&self, repo: &Path, reference: &str) -> Result<()>;
}

/// [`VersionControl`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitVersionControl {
    program: PathBuf,
}

impl Default for GitVersionControl {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitVersionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn git(&self, repo: &Path, args: &[&str]) -> Result<std::process::Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        ExecContext::new(repo).apply_std(&mut cmd);
        cmd.output().map_err(|e| {
            PackageError::VersionControl(format!("failed to run git {}: {e}", args.join(" ")))
        })
    }
}

impl VersionControl for GitVersionControl {
    fn current_ref(&self, repo: &Path) -> Result<String> {
        let output = self.git(repo, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PackageError::VersionControl(format!(
                "git rev-parse --abbrev-ref HEAD failed: {}",
                stderr.trim()
            )));
        }

        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if name.is_empty() {
            return Err(PackageError::VersionControl(
                "git rev-parse --abbrev-ref HEAD returned empty output".to_string(),
            ));
        }
        if name != "HEAD" {
            return Ok(name);
        }

        // Detached HEAD: fall back to the commit SHA
        let output = self.git(repo, &["rev-parse", "HEAD"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PackageError::VersionControl(format!(
                "git rev-parse HEAD failed: {}",
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn ref_exists(&self, repo: &Path, reference: &str) -> Result<bool> {
        let spec = format!("{reference}^{{commit}}");
        let output = self.git(repo, &["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(output.status.success())
    }

    /// Local changes are discarded: the pipeline only checks out snapshot
    /// copies, where resolution may rewrite tracked lockfiles.
    fn checkout(&self, repo: &Path, reference: &str) -> Result<()> {
        let output = self.git(repo, &["checkout", "--force", "--quiet", reference])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PackageError::VersionControl(format!(
                "git checkout {reference} failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Pin `repo` to `requested`, returning a guard that restores the original
/// reference.
///
/// When `requested` is already checked out nothing is changed and the guard
/// has nothing to restore.
pub fn pin(vcs: Arc<dyn VersionControl>, repo: &Path, requested: &str) -> Result<CheckoutGuard> {
    let original = vcs.current_ref(repo)?;
    if original == requested {
        info!(reference = %requested, "Snapshot already at requested version");
        return Ok(CheckoutGuard {
            vcs,
            repo: repo.to_path_buf(),
            original: None,
        });
    }

    if !vcs.ref_exists(repo, requested)? {
        return Err(PackageError::VersionResolution {
            version: requested.to_string(),
            detail: format!("no such reference in {}", repo.display()),
        });
    }

    info!(from = %original, to = %requested, "Checking out requested version");
    vcs.checkout(repo, requested)?;
    Ok(CheckoutGuard {
        vcs,
        repo: repo.to_path_buf(),
        original: Some(original),
    })
}

/// Restores the original reference of a pinned snapshot exactly once.
///
/// Call [`CheckoutGuard::restore`] to observe failures; an unrestored guard
/// restores on drop and logs any failure.
#[must_use = "dropping the guard restores the original reference immediately"]
pub struct CheckoutGuard {
    vcs: Arc<dyn VersionControl>,
    repo: PathBuf,
    original: Option<String>,
}

impl CheckoutGuard {
    /// Whether a checkout happened that must be undone.
    pub fn needs_restore(&self) -> bool {
        self.original.is_some()
    }

    /// Reference that will be restored, if any.
    pub fn original_ref(&self) -> Option<&str> {
        self.original.as_deref()
    }

    /// Check the original reference back out.
    pub fn restore(mut self) -> Result<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<()> {
        match self.original.take() {
            Some(original) => {
                debug!(reference = %original, "Restoring original reference");
                self.vcs.checkout(&self.repo, &original)
            }
            None => Ok(()),
        }
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore_inner() {
            warn!(repo = %self.repo.display(), error = %e, "Failed to restore original reference");
        }
    }
}

impl std::fmt::Debug for CheckoutGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutGuard")
            .field("repo", &self.repo)
            .field("original", &self.original)
            .finish()
    }
}
