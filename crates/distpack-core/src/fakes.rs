//! In-memory collaborator doubles (testing only)
//!
//! Provide `FakeVersionControl`, `FakeCompiler`, `FakeLicenseScanner`, and
//! `FakeFetcher`, which satisfy the collaborator traits without git, a
//! toolchain, a license scanner, or the network. Each records its calls so
//! tests can assert on what the pipeline asked for.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::compiler::{CompileRequest, Compiler};
use crate::context::ExecContext;
use crate::error::{PackageError, Result};
use crate::license::LicenseScanner;
use crate::metadata::AssetFetcher;
use crate::vcs::VersionControl;

// ---------------------------------------------------------------------------
// FakeVersionControl
// ---------------------------------------------------------------------------

/// A version-control call observed by [`FakeVersionControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    CurrentRef,
    RefExists(String),
    Checkout(String),
}

#[derive(Debug)]
struct VcsState {
    checked_out: String,
    calls: Vec<VcsCall>,
}

/// Tracks a single checked-out reference regardless of the repo path.
#[derive(Debug)]
pub struct FakeVersionControl {
    known: BTreeSet<String>,
    refused: BTreeSet<String>,
    state: Mutex<VcsState>,
}

impl FakeVersionControl {
    /// Start at `current`; `known` lists the other references that exist.
    pub fn new<I, S>(current: &str, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut known: BTreeSet<String> = known.into_iter().map(Into::into).collect();
        known.insert(current.to_string());
        Self {
            known,
            refused: BTreeSet::new(),
            state: Mutex::new(VcsState {
                checked_out: current.to_string(),
                calls: Vec::new(),
            }),
        }
    }

    /// Fail every checkout of `reference`, as git does over local changes.
    pub fn refusing_checkout(mut self, reference: &str) -> Self {
        self.refused.insert(reference.to_string());
        self
    }

    /// Reference currently checked out.
    pub fn checked_out(&self) -> String {
        self.state.lock().unwrap().checked_out.clone()
    }

    /// Every call, in order.
    pub fn calls(&self) -> Vec<VcsCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Checkout calls only.
    pub fn checkouts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                VcsCall::Checkout(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

impl VersionControl for FakeVersionControl {
    fn current_ref(&self, _repo: &Path) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VcsCall::CurrentRef);
        Ok(state.checked_out.clone())
    }

    fn ref_exists(&self, _repo: &Path, reference: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VcsCall::RefExists(reference.to_string()));
        Ok(self.known.contains(reference))
    }

    fn checkout(&self, _repo: &Path, reference: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VcsCall::Checkout(reference.to_string()));
        if !self.known.contains(reference) {
            return Err(PackageError::VersionControl(format!(
                "pathspec '{reference}' did not match"
            )));
        }
        if self.refused.contains(reference) {
            return Err(PackageError::VersionControl(format!(
                "local changes would be overwritten by checkout of '{reference}'"
            )));
        }
        state.checked_out = reference.to_string();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeCompiler
// ---------------------------------------------------------------------------

/// Writes fixed bytes to the requested output, or fails.
#[derive(Debug)]
pub struct FakeCompiler {
    outcome: std::result::Result<Vec<u8>, String>,
    requests: Mutex<Vec<CompileRequest>>,
}

impl FakeCompiler {
    pub fn succeeding(binary: Vec<u8>) -> Self {
        Self {
            outcome: Ok(binary),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(diagnostic: &str) -> Self {
        Self {
            outcome: Err(diagnostic.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompileRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn compile(&self, request: &CompileRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.outcome {
            Ok(binary) => std::fs::write(&request.output, binary)
                .map_err(|e| PackageError::Compilation(e.to_string())),
            Err(diagnostic) => Err(PackageError::Compilation(format!(
                "`fake-toolchain` exited with code 1:\n{diagnostic}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeLicenseScanner
// ---------------------------------------------------------------------------

/// Which scanner step a [`FakeLicenseScanner`] fails at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    Resolve,
    Cache,
}

#[derive(Debug, Default)]
struct ScanState {
    resolves: usize,
    caches: usize,
    contexts: Vec<ExecContext>,
    lockfile_seen: Option<bool>,
}

/// Writes fixed license records into `<cwd>/<cache_dir>` on `cache`.
#[derive(Debug)]
pub struct FakeLicenseScanner {
    cache_dir: String,
    records: Vec<(PathBuf, String)>,
    lockfile: String,
    failure: Option<ScanFailure>,
    state: Mutex<ScanState>,
}

impl FakeLicenseScanner {
    pub fn new<I, P, C>(cache_dir: &str, records: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<PathBuf>,
        C: Into<String>,
    {
        Self {
            cache_dir: cache_dir.to_string(),
            records: records
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
            lockfile: "Gemfile.lock".to_string(),
            failure: None,
            state: Mutex::new(ScanState::default()),
        }
    }

    /// Fail with a license collection error at `step`.
    pub fn failing(mut self, step: ScanFailure) -> Self {
        self.failure = Some(step);
        self
    }

    pub fn resolve_count(&self) -> usize {
        self.state.lock().unwrap().resolves
    }

    pub fn cache_count(&self) -> usize {
        self.state.lock().unwrap().caches
    }

    /// Contexts passed to every call, in order.
    pub fn contexts(&self) -> Vec<ExecContext> {
        self.state.lock().unwrap().contexts.clone()
    }

    /// Whether the lockfile existed when dependencies were resolved.
    pub fn lockfile_seen(&self) -> Option<bool> {
        self.state.lock().unwrap().lockfile_seen
    }
}

#[async_trait]
impl LicenseScanner for FakeLicenseScanner {
    async fn resolve_dependencies(&self, ctx: &ExecContext) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.resolves += 1;
        state.contexts.push(ctx.clone());
        state.lockfile_seen = Some(ctx.cwd().join(&self.lockfile).exists());
        if self.failure == Some(ScanFailure::Resolve) {
            return Err(PackageError::LicenseCollection(
                "`script/bootstrap` exited with code 1:\nCould not find gem".to_string(),
            ));
        }
        Ok(())
    }

    async fn cache(&self, ctx: &ExecContext) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.caches += 1;
        state.contexts.push(ctx.clone());
        if self.failure == Some(ScanFailure::Cache) {
            return Err(PackageError::LicenseCollection(
                "`bundle exec licensed cache` exited with code 1:\nsource failed".to_string(),
            ));
        }
        for (path, content) in &self.records {
            let dest = ctx.cwd().join(&self.cache_dir).join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PackageError::LicenseCollection(e.to_string()))?;
            }
            std::fs::write(&dest, content)
                .map_err(|e| PackageError::LicenseCollection(e.to_string()))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeFetcher
// ---------------------------------------------------------------------------

/// Serves a fixed body for every URL, or fails.
#[derive(Debug)]
pub struct FakeFetcher {
    outcome: std::result::Result<Vec<u8>, String>,
    urls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn serving(body: Vec<u8>) -> Self {
        Self {
            outcome: Ok(body),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            outcome: Err(reason.to_string()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.urls.lock().unwrap().push(url.to_string());
        match &self.outcome {
            Ok(body) => Ok(body.clone()),
            Err(reason) => Err(PackageError::Network(format!("{reason} from {url}"))),
        }
    }
}
