//! Temporary build and copy directories owned by one packaging run.

use crate::error::{PackageError, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const BUILD_PREFIX: &str = "distpack-build-";
const COPY_PREFIX: &str = "distpack-copy-";

/// Two process-unique scratch directories: the package being assembled and
/// the source snapshot it is built from.
///
/// Both directories are removed when the workspace is released or dropped,
/// whichever comes first.
#[derive(Debug)]
pub struct Workspace {
    build: TempDir,
    copy: TempDir,
}

impl Workspace {
    /// Create both directories under `temp_root`, or the system temp dir.
    pub fn acquire(temp_root: Option<&Path>) -> Result<Self> {
        let root = match temp_root {
            Some(root) => root.to_path_buf(),
            None => std::env::temp_dir(),
        };
        let build = make_dir(&root, BUILD_PREFIX)?;
        let copy = make_dir(&root, COPY_PREFIX)?;
        debug!(
            build_dir = %build.path().display(),
            copy_dir = %copy.path().display(),
            "Workspace acquired"
        );
        Ok(Self { build, copy })
    }

    /// Directory assembled into the final archive.
    pub fn build_dir(&self) -> &Path {
        self.build.path()
    }

    /// Directory holding the source snapshot.
    pub fn copy_dir(&self) -> &Path {
        self.copy.path()
    }

    /// `meta/` inside the build directory.
    pub fn meta_dir(&self) -> PathBuf {
        self.build_dir().join("meta")
    }

    /// Remove both directories, reporting the first removal failure.
    ///
    /// The second directory is removed even when the first fails.
    pub fn release(self) -> Result<()> {
        let Workspace { build, copy } = self;
        let copy_path = copy.path().to_path_buf();
        let build_path = build.path().to_path_buf();
        let copy_result = copy.close();
        let build_result = build.close();

        let mut first = None;
        for (path, result) in [(copy_path, copy_result), (build_path, build_result)] {
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to remove workspace directory");
                first.get_or_insert(PackageError::Workspace(format!(
                    "failed to remove {}: {e}",
                    path.display()
                )));
            }
        }
        match first {
            Some(err) => Err(err),
            None => {
                debug!("Workspace released");
                Ok(())
            }
        }
    }
}

fn make_dir(root: &Path, prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(root)
        .map_err(|e| {
            PackageError::Workspace(format!(
                "failed to create {prefix}* under {}: {e}",
                root.display()
            ))
        })
}
