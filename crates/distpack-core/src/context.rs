//! Immutable execution context for external tool invocations.
//!
//! Stages never touch the process-wide environment or current directory.
//! Each invocation receives the working directory and environment edits it
//! needs through an [`ExecContext`] built up front.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Working directory plus environment edits for one external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    cwd: PathBuf,
    removed: BTreeSet<String>,
    set: BTreeMap<String, String>,
}

impl ExecContext {
    /// Context rooted at `cwd` that inherits the parent environment untouched.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            removed: BTreeSet::new(),
            set: BTreeMap::new(),
        }
    }

    /// Clear an inherited variable for the child process.
    pub fn without_var(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.set.remove(&name);
        self.removed.insert(name);
        self
    }

    /// Clear several inherited variables.
    pub fn without_vars<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |ctx, name| ctx.without_var(name))
    }

    /// Set a variable for the child process.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.removed.remove(&name);
        self.set.insert(name, value.into());
        self
    }

    /// Working directory of the child process.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Whether `name` is cleared for the child process.
    pub fn clears(&self, name: &str) -> bool {
        self.removed.contains(name)
    }

    /// Value explicitly set for `name`, if any.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.set.get(name).map(String::as_str)
    }

    pub(crate) fn apply(&self, cmd: &mut tokio::process::Command) {
        cmd.current_dir(&self.cwd);
        for name in &self.removed {
            cmd.env_remove(name);
        }
        cmd.envs(&self.set);
    }

    pub(crate) fn apply_std(&self, cmd: &mut std::process::Command) {
        cmd.current_dir(&self.cwd);
        for name in &self.removed {
            cmd.env_remove(name);
        }
        cmd.envs(&self.set);
    }
}
