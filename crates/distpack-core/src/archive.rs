//! Compressed archive of the assembled package.

use crate::config::{ARCH, ARCHIVE_EXT, PKG_DIR};
use crate::error::{PackageError, Result};
use crate::manifest::{EntryKind, PackageManifest};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lowercase kernel name of the host (`linux`, `darwin`, ...).
pub fn host_platform() -> String {
    platform_for(std::env::consts::OS)
}

/// Map a Rust OS name to the kernel name used in archive names.
pub fn platform_for(os: &str) -> String {
    match os {
        "macos" | "ios" => "darwin".to_string(),
        other => other.to_lowercase(),
    }
}

/// `<name>-<version>-<platform>-x64.tar.gz`
pub fn archive_file_name(name: &str, version: &str, platform: &str) -> String {
    format!("{name}-{version}-{platform}-{ARCH}.{ARCHIVE_EXT}")
}

/// `<root>/pkg/<version>/<name>-<version>-<platform>-x64.tar.gz`
pub fn archive_path(root: &Path, name: &str, version: &str, platform: &str) -> PathBuf {
    root.join(PKG_DIR)
        .join(version)
        .join(archive_file_name(name, version, platform))
}

/// A finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Writes gzip-compressed tarballs of a build directory.
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// Archive the entries of `manifest` (relative to `build_dir`) at `target`.
    ///
    /// Entries sit at the archive root with deterministic headers. The
    /// archive is written beside `target` under a temporary name and only
    /// renamed over `target` once complete, so a failed build never replaces
    /// an earlier artifact.
    pub fn build(build_dir: &Path, manifest: &PackageManifest, target: &Path) -> Result<ArchiveSummary> {
        let parent = target
            .parent()
            .ok_or_else(|| archive_err(format!("{} has no parent directory", target.display())))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| archive_err(format!("failed to create {}: {e}", parent.display())))?;

        let staging = tempfile::Builder::new()
            .prefix(".distpack-")
            .suffix(".partial")
            .tempfile_in(parent)
            .map_err(|e| archive_err(format!("failed to create staging file: {e}")))?;

        info!(target = %target.display(), entries = manifest.len(), "Writing archive");
        write_tarball(build_dir, manifest, staging.as_file())?;
        staging
            .as_file()
            .sync_all()
            .map_err(|e| archive_err(format!("failed to flush archive: {e}")))?;

        staging
            .persist(target)
            .map_err(|e| archive_err(format!("failed to move archive into place: {}", e.error)))?;

        let (sha256, size_bytes) = digest_file(target)?;
        debug!(sha256 = %sha256, size_bytes, "Archive written");
        Ok(ArchiveSummary {
            path: target.to_path_buf(),
            sha256,
            size_bytes,
        })
    }
}

fn write_tarball(build_dir: &Path, manifest: &PackageManifest, file: &File) -> Result<()> {
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.mode(tar::HeaderMode::Deterministic);
    tar.follow_symlinks(false);

    for entry in &manifest.entries {
        let source = build_dir.join(&entry.path);
        let appended = match entry.kind {
            EntryKind::Dir => tar.append_dir(&entry.path, &source),
            EntryKind::File | EntryKind::Symlink => tar.append_path_with_name(&source, &entry.path),
        };
        appended.map_err(|e| archive_err(format!("failed to add {}: {e}", entry.path.display())))?;
    }

    let encoder = tar
        .into_inner()
        .map_err(|e| archive_err(format!("failed to finish tar stream: {e}")))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| archive_err(format!("failed to finish gzip stream: {e}")))?;
    writer
        .flush()
        .map_err(|e| archive_err(format!("failed to flush archive: {e}")))
}

/// SHA-256 hex digest and size of `path`.
pub fn digest_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)
        .map_err(|e| archive_err(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)
        .map_err(|e| archive_err(format!("failed to read {}: {e}", path.display())))?;
    Ok((hex::encode(hasher.finalize()), size))
}

fn archive_err(msg: String) -> PackageError {
    PackageError::Archive(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestEntry, PackageManifest};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn build_dir() -> (tempfile::TempDir, PackageManifest) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tool"), "#!/bin/sh\necho tool\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path().join("tool"), std::fs::Permissions::from_mode(0o755))
                .unwrap();
        }
        std::fs::create_dir_all(dir.path().join("meta/ruby")).unwrap();
        std::fs::write(dir.path().join("meta/ruby/license.txt"), "ruby license").unwrap();

        let manifest = PackageManifest {
            executable: PathBuf::from("tool"),
            entries: vec![
                ManifestEntry { path: PathBuf::from("meta"), kind: EntryKind::Dir },
                ManifestEntry { path: PathBuf::from("meta/ruby"), kind: EntryKind::Dir },
                ManifestEntry {
                    path: PathBuf::from("meta/ruby/license.txt"),
                    kind: EntryKind::File,
                },
                ManifestEntry { path: PathBuf::from("tool"), kind: EntryKind::File },
            ],
        };
        (dir, manifest)
    }

    fn read_entries(path: &Path) -> Vec<(String, u32, Vec<u8>)> {
        let file = File::open(path).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mode = entry.header().mode().unwrap();
                let mut body = Vec::new();
                entry.read_to_end(&mut body).unwrap();
                (name, mode, body)
            })
            .collect()
    }

    #[test]
    fn test_archive_path_layout() {
        let path = archive_path(Path::new("/repo"), "licensed", "2.3.0", "linux");
        assert_eq!(
            path,
            PathBuf::from("/repo/pkg/2.3.0/licensed-2.3.0-linux-x64.tar.gz")
        );
    }

    #[test]
    fn test_platform_for() {
        assert_eq!(platform_for("linux"), "linux");
        assert_eq!(platform_for("macos"), "darwin");
        assert_eq!(platform_for("FreeBSD"), "freebsd");
        let host = host_platform();
        assert_eq!(host, host.to_lowercase());
        assert!(!host.is_empty());
    }

    #[test]
    fn test_build_writes_root_level_entries() {
        let (dir, manifest) = build_dir();
        let out = tempfile::tempdir().unwrap();
        let target = archive_path(out.path(), "tool", "2.3.0", "linux");

        let summary = ArchiveBuilder::build(dir.path(), &manifest, &target).unwrap();
        assert_eq!(summary.path, target);
        assert!(target.is_file());

        let entries = read_entries(&target);
        let names: Vec<&str> = entries.iter().map(|(n, _, _)| n.trim_end_matches('/')).collect();
        assert_eq!(names, vec!["meta", "meta/ruby", "meta/ruby/license.txt", "tool"]);

        let (_, mode, body) = entries.iter().find(|(n, _, _)| n == "tool").unwrap();
        assert_eq!(body, b"#!/bin/sh\necho tool\n");
        #[cfg(unix)]
        assert_eq!(mode & 0o111, 0o111);
        #[cfg(not(unix))]
        let _ = mode;
    }

    #[test]
    fn test_summary_digest_matches_file() {
        let (dir, manifest) = build_dir();
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("pkg/1.0.0/tool-1.0.0-linux-x64.tar.gz");

        let summary = ArchiveBuilder::build(dir.path(), &manifest, &target).unwrap();
        let bytes = std::fs::read(&target).unwrap();
        assert_eq!(summary.size_bytes, bytes.len() as u64);
        assert_eq!(summary.sha256, hex::encode(Sha256::digest(&bytes)));
    }

    #[test]
    fn test_build_is_reproducible() {
        let (dir, manifest) = build_dir();
        let out = tempfile::tempdir().unwrap();
        let first = ArchiveBuilder::build(dir.path(), &manifest, &out.path().join("a.tar.gz")).unwrap();
        let second = ArchiveBuilder::build(dir.path(), &manifest, &out.path().join("b.tar.gz")).unwrap();
        assert_eq!(first.sha256, second.sha256);
    }

    #[test]
    fn test_failed_build_keeps_previous_artifact() {
        let (dir, mut manifest) = build_dir();
        let out = tempfile::tempdir().unwrap();
        let target = archive_path(out.path(), "tool", "2.3.0", "linux");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"previous artifact").unwrap();

        manifest.entries.push(ManifestEntry {
            path: PathBuf::from("meta/missing.txt"),
            kind: EntryKind::File,
        });
        let err = ArchiveBuilder::build(dir.path(), &manifest, &target).unwrap_err();

        assert!(matches!(err, PackageError::Archive(_)));
        assert_eq!(std::fs::read(&target).unwrap(), b"previous artifact");
        let leftovers = std::fs::read_dir(target.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1, "staging file should be removed");
    }
}
