//! Packaging configuration.
//!
//! Every field has a default. [`PackageConfig::from_env`] layers `DISTPACK_*`
//! environment variables on top, and the CLI applies its flags last through
//! the `with_*` builders.

use crate::error::{PackageError, Result};
use crate::manifest::META_DIR;
use crate::runner::CommandSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Architecture suffix of every archive name.
pub const ARCH: &str = "x64";

/// Archive file extension.
pub const ARCHIVE_EXT: &str = "tar.gz";

/// Directory under the output root that receives archives.
pub const PKG_DIR: &str = "pkg";

/// Static license text of the runtime embedded in the executable.
pub const DEFAULT_RUNTIME_LICENSE_URL: &str = "https://www.ruby-lang.org/en/about/license.txt";

/// Dependency resolution and license scanning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LicenseConfig {
    /// Resolves dependencies from scratch in the snapshot.
    pub bootstrap: CommandSpec,

    /// Runs the license-scanning tool in cache mode.
    pub scan: CommandSpec,

    /// Cache directory written by the scanner, relative to the snapshot.
    pub cache_dir: String,

    /// Lockfiles removed from the snapshot root before resolution.
    pub lockfiles: Vec<String>,

    /// Variables cleared for bootstrap and scan.
    pub cleared_env: Vec<String>,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            bootstrap: CommandSpec::new("script/bootstrap", Vec::<String>::new()),
            scan: CommandSpec::new("bundle", ["exec", "licensed", "cache"]),
            cache_dir: ".licenses".to_string(),
            lockfiles: vec!["Gemfile.lock".to_string()],
            cleared_env: vec!["RUBY_VERSION".to_string(), "BUNDLE_GEMFILE".to_string()],
        }
    }
}

/// Static metadata copied next to the executable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetadataConfig {
    /// Runtime name; its license lands at `meta/<runtime>/license.txt`.
    pub runtime: String,

    /// Where the runtime license text is fetched from.
    pub runtime_license_url: String,

    /// Project files copied from the snapshot root into `meta/`.
    pub project_files: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            runtime: "ruby".to_string(),
            runtime_license_url: DEFAULT_RUNTIME_LICENSE_URL.to_string(),
            project_files: vec!["LICENSE".to_string(), "README.md".to_string()],
        }
    }
}

/// Full configuration of a packaging run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageConfig {
    /// Package and executable name.
    pub name: String,

    /// Source tree to snapshot.
    pub source_root: PathBuf,

    /// Root that receives `pkg/`; defaults to the source root.
    #[serde(default)]
    pub output_root: Option<PathBuf>,

    /// Entry point relative to the source root; defaults to `bin/<name>`.
    #[serde(default)]
    pub entry_point: Option<PathBuf>,

    /// Snapshot exclude patterns.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    #[serde(default)]
    pub license: LicenseConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Trusted-certificate directory; detected from openssl when unset.
    #[serde(default)]
    pub cert_dir: Option<PathBuf>,

    /// Parent of the temporary workspace; the system temp dir when unset.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,

    /// Per-invocation timeout for external tools, 0 disables it.
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_excludes() -> Vec<String> {
    ["test", ".licenses", "vendor", "Gemfile.lock", "/pkg"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl PackageConfig {
    /// Defaults for `source_root`, naming the package after its directory.
    pub fn for_source(source_root: impl Into<PathBuf>) -> Self {
        let source_root = source_root.into();
        let name = source_root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "package".to_string());
        Self {
            name,
            source_root,
            output_root: None,
            entry_point: None,
            excludes: default_excludes(),
            license: LicenseConfig::default(),
            metadata: MetadataConfig::default(),
            cert_dir: None,
            temp_root: None,
            timeout_secs: 0,
        }
    }

    /// Defaults for `source_root` with `DISTPACK_*` overrides applied.
    pub fn from_env(source_root: impl Into<PathBuf>) -> Result<Self> {
        Self::for_source(source_root).apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = get("DISTPACK_NAME") {
            self.name = name;
        }
        if let Some(entry) = get("DISTPACK_ENTRY") {
            self.entry_point = Some(PathBuf::from(entry));
        }
        if let Some(root) = get("DISTPACK_OUTPUT_ROOT") {
            self.output_root = Some(PathBuf::from(root));
        }
        if let Some(url) = get("DISTPACK_RUNTIME_LICENSE_URL") {
            self.metadata.runtime_license_url = url;
        }
        if let Some(dir) = get("DISTPACK_CERT_DIR") {
            self.cert_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get("DISTPACK_TEMP_ROOT") {
            self.temp_root = Some(PathBuf::from(dir));
        }
        if let Some(secs) = get("DISTPACK_TIMEOUT_SECS") {
            self.timeout_secs = secs.trim().parse().map_err(|_| {
                PackageError::Configuration(format!(
                    "DISTPACK_TIMEOUT_SECS must be a whole number of seconds, got '{secs}'"
                ))
            })?;
        }
        Ok(self)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_entry_point(mut self, entry: impl Into<PathBuf>) -> Self {
        self.entry_point = Some(entry.into());
        self
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_license(mut self, license: LicenseConfig) -> Self {
        self.license = license;
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataConfig) -> Self {
        self.metadata = metadata;
        self
    }

    /// Entry point relative to the source root.
    pub fn entry_point(&self) -> PathBuf {
        self.entry_point
            .clone()
            .unwrap_or_else(|| Path::new("bin").join(&self.name))
    }

    /// Root under which `pkg/` is created.
    pub fn output_root(&self) -> &Path {
        self.output_root.as_deref().unwrap_or(&self.source_root)
    }

    /// Reject values that would produce paths outside the intended layout.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PackageError::Configuration(
                "package name must not be empty".to_string(),
            ));
        }
        if !is_single_component(&self.name) {
            return Err(PackageError::Configuration(format!(
                "package name '{}' must be a single path component",
                self.name
            )));
        }
        if self.name == META_DIR {
            return Err(PackageError::Configuration(format!(
                "package name '{META_DIR}' collides with the metadata directory"
            )));
        }
        if self.entry_point().is_absolute() {
            return Err(PackageError::Configuration(format!(
                "entry point {} must be relative to the source root",
                self.entry_point().display()
            )));
        }
        if self.license.cache_dir.trim().is_empty() || !is_single_component(&self.license.cache_dir) {
            return Err(PackageError::Configuration(format!(
                "license cache dir '{}' must be a single path component",
                self.license.cache_dir
            )));
        }
        if self.metadata.runtime.trim().is_empty() || !is_single_component(&self.metadata.runtime) {
            return Err(PackageError::Configuration(format!(
                "runtime name '{}' must be a single path component",
                self.metadata.runtime
            )));
        }
        Ok(())
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self::for_source(".")
    }
}

/// Whether `value` can be used as one file name (no separators, not `.`/`..`).
pub(crate) fn is_single_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains('/')
        && !value.contains('\\')
}
