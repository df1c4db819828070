//! Filtered copy of the source tree.
//!
//! Exclude patterns use rsync `--exclude` semantics: a pattern without `/`
//! matches a file or directory name at any depth, a pattern with `/`
//! (including a leading one, as in `/pkg`) is anchored at the source root. `*` matches any run of characters within a
//! single path component.

use crate::error::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use tracing::{debug, info};

/// Compiled exclude patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeSet {
    patterns: Vec<String>,
}

impl ExcludeSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .map(|p: String| p.trim_end_matches('/').to_string())
                .filter(|p| !p.trim_start_matches('/').is_empty())
                .collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `relative` (a path below the source root) is excluded.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let Some(name) = parts.last() else {
            return false;
        };

        self.patterns.iter().any(|pattern| {
            if pattern.contains('/') {
                let segments: Vec<&str> = pattern.trim_start_matches('/').split('/').collect();
                segments.len() == parts.len()
                    && segments
                        .iter()
                        .zip(parts.iter())
                        .all(|(seg, part)| wildcard_match(seg, part))
            } else {
                wildcard_match(pattern, name)
            }
        })
    }
}

/// Match `text` against `pattern`, where `*` matches any run of characters.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Counters for a finished snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub files: usize,
    pub dirs: usize,
    pub excluded: usize,
}

/// Copy `source_root` into `dest_dir`, skipping excluded paths.
pub fn snapshot(source_root: &Path, dest_dir: &Path, excludes: &ExcludeSet) -> Result<SnapshotStats> {
    if !source_root.is_dir() {
        return Err(PackageError::Snapshot(format!(
            "source root {} is not a directory",
            source_root.display()
        )));
    }
    info!(
        source = %source_root.display(),
        dest = %dest_dir.display(),
        excludes = ?excludes.patterns(),
        "Snapshotting source tree"
    );

    let mut stats = SnapshotStats::default();
    copy_tree(source_root, dest_dir, Path::new(""), excludes, &mut stats)
        .map_err(|e| PackageError::Snapshot(e.to_string()))?;

    debug!(files = stats.files, dirs = stats.dirs, excluded = stats.excluded, "Snapshot complete");
    Ok(stats)
}

/// Recursively copy `src` to `dst` with no filtering.
pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    let mut stats = SnapshotStats::default();
    copy_tree(src, dst, Path::new(""), &ExcludeSet::default(), &mut stats)
}

fn copy_tree(
    src: &Path,
    dst: &Path,
    relative: &Path,
    excludes: &ExcludeSet,
    stats: &mut SnapshotStats,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;

    let mut entries: Vec<_> = std::fs::read_dir(src)?.collect::<std::io::Result<_>>()?;
    // Sort for deterministic ordering
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let rel = relative.join(&name);
        if excludes.is_excluded(&rel) {
            stats.excluded += 1;
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
            stats.files += 1;
        } else if file_type.is_dir() {
            copy_tree(&from, &to, &rel, excludes, stats)?;
            stats.dirs += 1;
        } else {
            std::fs::copy(&from, &to)?;
            stats.files += 1;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    let target = std::fs::read_link(from)?;
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    if from.is_dir() {
        copy_dir_all(from, to)
    } else {
        std::fs::copy(from, to).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn default_excludes() -> ExcludeSet {
        ExcludeSet::new(["test", ".licenses", "vendor", "Gemfile.lock"])
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.lock", "Gemfile.lock"));
        assert!(wildcard_match("vendor", "vendor"));
        assert!(wildcard_match("ven*r", "vendor"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("*.lock", "Gemfile"));
        assert!(!wildcard_match("vendor", "vendored"));
    }

    #[test]
    fn test_unanchored_pattern_matches_any_depth() {
        let set = default_excludes();
        assert!(set.is_excluded(Path::new("test")));
        assert!(set.is_excluded(Path::new("lib/deep/test")));
        assert!(set.is_excluded(Path::new("sub/Gemfile.lock")));
        assert!(!set.is_excluded(Path::new("lib/testing")));
        assert!(!set.is_excluded(Path::new("")));
    }

    #[test]
    fn test_anchored_pattern_matches_only_at_root() {
        let set = ExcludeSet::new(["/script/cache", "docs/*.md"]);
        assert!(set.is_excluded(Path::new("script/cache")));
        assert!(!set.is_excluded(Path::new("lib/script/cache")));
        assert!(set.is_excluded(Path::new("docs/intro.md")));
        assert!(!set.is_excluded(Path::new("docs/intro.txt")));
    }

    #[test]
    fn test_leading_slash_anchors_single_component() {
        let set = ExcludeSet::new(["/pkg", "vendor/"]);
        assert_eq!(set.patterns(), ["/pkg", "vendor"]);
        assert!(set.is_excluded(Path::new("pkg")));
        assert!(!set.is_excluded(Path::new("lib/hub/pkg")));
        assert!(set.is_excluded(Path::new("lib/vendor")));
        assert!(ExcludeSet::new(["/", ""]).patterns().is_empty());
    }

    #[test]
    fn test_snapshot_keeps_nested_pkg_dirs() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(src.path(), "pkg/1.0.0/old.tar.gz", "old");
        write(src.path(), "lib/hub/pkg/installer.rb", "module Installer; end");

        let excludes = ExcludeSet::new(crate::config::PackageConfig::for_source(src.path()).excludes);
        snapshot(src.path(), dst.path(), &excludes).unwrap();

        assert!(!dst.path().join("pkg").exists());
        assert!(dst.path().join("lib/hub/pkg/installer.rb").is_file());
    }

    #[test]
    fn test_snapshot_filters_tree() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(src.path(), "bin/tool", "#!/usr/bin/env ruby");
        write(src.path(), "lib/tool.rb", "module Tool; end");
        write(src.path(), "test/tool_test.rb", "");
        write(src.path(), ".licenses/bundler/rake.dep.yml", "");
        write(src.path(), "vendor/cache/rake.gem", "");
        write(src.path(), "Gemfile", "source 'https://rubygems.org'");
        write(src.path(), "Gemfile.lock", "GEM");
        write(src.path(), ".git/HEAD", "ref: refs/heads/main");

        let stats = snapshot(src.path(), dst.path(), &default_excludes()).unwrap();

        assert!(dst.path().join("bin/tool").is_file());
        assert!(dst.path().join("lib/tool.rb").is_file());
        assert!(dst.path().join("Gemfile").is_file());
        assert!(dst.path().join(".git/HEAD").is_file());
        assert!(!dst.path().join("test").exists());
        assert!(!dst.path().join(".licenses").exists());
        assert!(!dst.path().join("vendor").exists());
        assert!(!dst.path().join("Gemfile.lock").exists());
        assert_eq!(stats.excluded, 4);
    }

    #[test]
    fn test_snapshot_leaves_source_untouched() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(src.path(), "Gemfile.lock", "GEM");
        snapshot(src.path(), dst.path(), &default_excludes()).unwrap();
        std::fs::write(dst.path().join("Gemfile"), "changed").unwrap();

        assert!(src.path().join("Gemfile.lock").is_file());
        assert!(!src.path().join("Gemfile").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_preserves_permissions_and_symlinks() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(src.path(), "bin/tool", "#!/bin/sh");
        std::fs::set_permissions(
            src.path().join("bin/tool"),
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        std::os::unix::fs::symlink("bin/tool", src.path().join("tool-link")).unwrap();

        snapshot(src.path(), dst.path(), &ExcludeSet::default()).unwrap();

        let mode = std::fs::metadata(dst.path().join("bin/tool"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            std::fs::read_link(dst.path().join("tool-link")).unwrap(),
            PathBuf::from("bin/tool")
        );
    }

    #[test]
    fn test_snapshot_missing_source() {
        let dst = tempfile::tempdir().unwrap();
        let err = snapshot(Path::new("/nonexistent/distpack"), dst.path(), &ExcludeSet::default())
            .unwrap_err();
        assert!(matches!(err, PackageError::Snapshot(_)));
    }
}
