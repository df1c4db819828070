//! Shape check of the assembled build directory.
//!
//! A package is exactly one top-level executable plus a `meta/` tree with the
//! license cache, the runtime license text, and the project files. The
//! archive is written from the entries listed here, so what was checked is
//! what gets shipped.

use crate::config::PackageConfig;
use crate::error::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the metadata directory inside the package.
pub const META_DIR: &str = "meta";

/// What a complete package must contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestExpectations {
    pub executable: String,
    pub cache_dir: String,
    pub runtime: String,
    pub project_files: Vec<String>,
}

impl ManifestExpectations {
    pub fn from_config(config: &PackageConfig) -> Self {
        Self {
            executable: config.name.clone(),
            cache_dir: config.license.cache_dir.clone(),
            runtime: config.metadata.runtime.clone(),
            project_files: config.metadata.project_files.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// One path in the package, relative to the build directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Verified contents of a build directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Executable path relative to the build directory.
    pub executable: PathBuf,

    /// Every entry, depth-first, siblings sorted by name.
    pub entries: Vec<ManifestEntry>,
}

impl PackageManifest {
    /// List `build_dir` and check it against `expect`.
    pub fn inspect(build_dir: &Path, expect: &ManifestExpectations) -> Result<Self> {
        let top: Vec<String> = read_sorted(build_dir)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let mut wanted = vec![expect.executable.clone(), META_DIR.to_string()];
        wanted.sort();
        if top != wanted {
            return Err(incomplete(format!(
                "expected top-level entries {wanted:?}, found {top:?}"
            )));
        }

        let executable = build_dir.join(&expect.executable);
        if !executable.is_file() {
            return Err(incomplete(format!("{} is not a file", expect.executable)));
        }
        if !is_executable(&executable) {
            return Err(incomplete(format!("{} is not executable", expect.executable)));
        }

        let meta = build_dir.join(META_DIR);
        if !meta.join(&expect.cache_dir).is_dir() {
            return Err(incomplete(format!(
                "license cache {META_DIR}/{} is missing",
                expect.cache_dir
            )));
        }
        let runtime_license = meta.join(&expect.runtime).join("license.txt");
        if !runtime_license.is_file() {
            return Err(incomplete(format!(
                "runtime license {META_DIR}/{}/license.txt is missing",
                expect.runtime
            )));
        }
        for name in &expect.project_files {
            if !meta.join(name).is_file() {
                return Err(incomplete(format!("{META_DIR}/{name} is missing")));
            }
        }

        let mut entries = Vec::new();
        walk(build_dir, Path::new(""), &mut entries)?;
        Ok(Self {
            executable: PathBuf::from(&expect.executable),
            entries,
        })
    }

    /// Regular files and symlinks in the package.
    pub fn files(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.kind != EntryKind::Dir)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn incomplete(msg: String) -> PackageError {
    PackageError::IncompleteManifest(msg)
}

fn read_sorted(dir: &Path) -> Result<Vec<(String, std::fs::FileType)>> {
    let read = std::fs::read_dir(dir)
        .map_err(|e| incomplete(format!("failed to read {}: {e}", dir.display())))?;
    let mut entries = Vec::new();
    for entry in read {
        let entry = entry.map_err(|e| incomplete(format!("failed to read {}: {e}", dir.display())))?;
        let file_type = entry
            .file_type()
            .map_err(|e| incomplete(format!("failed to stat {}: {e}", entry.path().display())))?;
        entries.push((entry.file_name().to_string_lossy().into_owned(), file_type));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn walk(root: &Path, relative: &Path, out: &mut Vec<ManifestEntry>) -> Result<()> {
    for (name, file_type) in read_sorted(&root.join(relative))? {
        let path = relative.join(&name);
        if file_type.is_symlink() {
            out.push(ManifestEntry {
                path,
                kind: EntryKind::Symlink,
            });
        } else if file_type.is_dir() {
            out.push(ManifestEntry {
                path: path.clone(),
                kind: EntryKind::Dir,
            });
            walk(root, &path, out)?;
        } else {
            out.push(ManifestEntry {
                path,
                kind: EntryKind::File,
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}
