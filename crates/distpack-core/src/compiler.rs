//! Compiler toolchain adapter.
//!
//! The toolchain turns the snapshot's entry point into a standalone
//! executable. It is invoked as
//! `<compiler> <entry> -o <output> [--openssl-dir=<dir>] --clean-tmpdir`
//! with the snapshot as working directory.

use crate::context::ExecContext;
use crate::error::{PackageError, Result};
use crate::runner::{Invocation, ToolRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything a toolchain needs for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Entry point, relative to the context's working directory.
    pub entry_point: PathBuf,

    /// Where the toolchain must write the executable.
    pub output: PathBuf,

    /// Trusted-certificate directory baked into the executable.
    pub cert_dir: Option<PathBuf>,

    /// Working directory and environment for the toolchain.
    pub context: ExecContext,
}

/// Builds a standalone executable from an entry point.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Produce `request.output` or fail with [`PackageError::Compilation`].
    async fn compile(&self, request: &CompileRequest) -> Result<()>;
}

/// [`Compiler`] backed by an external toolchain executable.
#[derive(Debug, Clone)]
pub struct ToolchainCompiler {
    program: PathBuf,
    runner: ToolRunner,
}

impl ToolchainCompiler {
    pub fn new(program: impl Into<PathBuf>, runner: ToolRunner) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Command line for `request`.
    pub fn invocation(&self, request: &CompileRequest) -> Invocation {
        let mut inv = Invocation::new(&self.program)
            .arg(&request.entry_point)
            .arg("-o")
            .arg(&request.output);
        if let Some(dir) = &request.cert_dir {
            let mut flag = std::ffi::OsString::from("--openssl-dir=");
            flag.push(dir.as_os_str());
            inv = inv.arg(flag);
        }
        inv.arg("--clean-tmpdir")
    }
}

#[async_trait]
impl Compiler for ToolchainCompiler {
    async fn compile(&self, request: &CompileRequest) -> Result<()> {
        let invocation = self.invocation(request);
        let output = self
            .runner
            .run_checked(&invocation, &request.context, PackageError::Compilation)
            .await?;
        debug!(duration_ms = output.duration_ms, "Toolchain finished");
        Ok(())
    }
}

/// Host-derived toolchain parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainConfig {
    /// Trusted-certificate directory of the host's OpenSSL installation.
    pub cert_dir: Option<PathBuf>,
}

impl ToolchainConfig {
    /// Use `configured` when given, otherwise ask `openssl version -d`.
    ///
    /// Detection failure is not fatal: the toolchain falls back to its own
    /// default certificate directory.
    pub async fn detect(runner: &ToolRunner, ctx: &ExecContext, configured: Option<&Path>) -> Self {
        if let Some(dir) = configured {
            return Self {
                cert_dir: Some(dir.to_path_buf()),
            };
        }

        let invocation = Invocation::new("openssl").args(["version", "-d"]);
        let cert_dir = match runner.run(&invocation, ctx).await {
            Ok(out) if out.passed() => parse_openssl_dir(&out.stdout),
            Ok(out) => {
                warn!(exit_code = out.exit_code, "openssl version -d failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "Could not query openssl for its certificate directory");
                None
            }
        };
        if cert_dir.is_none() {
            warn!("No trusted-certificate directory detected; toolchain default applies");
        }
        Self { cert_dir }
    }
}

/// Extract the directory from `OPENSSLDIR: "/usr/lib/ssl"`.
pub fn parse_openssl_dir(stdout: &str) -> Option<PathBuf> {
    let line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("OPENSSLDIR:"))?;
    let value = line.split_once(':')?.1.trim().trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

/// Compile `entry_point` into `build_dir/<name>` and mark it executable.
///
/// The toolchain writes to a staging name first; the executable only appears
/// under its final name once the toolchain has succeeded.
pub async fn compile_executable(
    compiler: &dyn Compiler,
    entry_point: &Path,
    build_dir: &Path,
    name: &str,
    toolchain: &ToolchainConfig,
    context: &ExecContext,
) -> Result<PathBuf> {
    if !context.cwd().join(entry_point).is_file() {
        return Err(PackageError::Compilation(format!(
            "entry point {} not found in snapshot",
            entry_point.display()
        )));
    }

    let staging = build_dir.join(format!(".{name}.partial"));
    let target = build_dir.join(name);
    let request = CompileRequest {
        entry_point: entry_point.to_path_buf(),
        output: staging.clone(),
        cert_dir: toolchain.cert_dir.clone(),
        context: context.clone(),
    };

    info!(entry = %entry_point.display(), output = %target.display(), "Compiling executable");
    if let Err(e) = compiler.compile(&request).await {
        let _ = std::fs::remove_file(&staging);
        return Err(e);
    }

    if !staging.is_file() {
        return Err(PackageError::Compilation(format!(
            "toolchain reported success but wrote no executable at {}",
            staging.display()
        )));
    }

    mark_executable(&staging)?;
    std::fs::rename(&staging, &target).map_err(|e| {
        PackageError::Compilation(format!("failed to move executable into place: {e}"))
    })?;
    Ok(target)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        PackageError::Compilation(format!("failed to set executable permissions: {e}"))
    })
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeCompiler;

    fn request(cert_dir: Option<&str>) -> CompileRequest {
        CompileRequest {
            entry_point: PathBuf::from("bin/tool"),
            output: PathBuf::from("/build/.tool.partial"),
            cert_dir: cert_dir.map(PathBuf::from),
            context: ExecContext::new("/snapshot"),
        }
    }

    fn snapshot_with_entry() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/tool"), "puts 'hi'").unwrap();
        dir
    }

    #[test]
    fn test_parse_openssl_dir() {
        assert_eq!(
            parse_openssl_dir("OPENSSLDIR: \"/usr/lib/ssl\"\n"),
            Some(PathBuf::from("/usr/lib/ssl"))
        );
        assert_eq!(
            parse_openssl_dir("OPENSSLDIR: \"/opt/homebrew/etc/openssl@3\""),
            Some(PathBuf::from("/opt/homebrew/etc/openssl@3"))
        );
        assert_eq!(parse_openssl_dir("OPENSSLDIR: \"\""), None);
        assert_eq!(parse_openssl_dir("OpenSSL 3.0.2"), None);
    }

    #[test]
    fn test_invocation_with_cert_dir() {
        let compiler = ToolchainCompiler::new("/opt/toolchain-x64", ToolRunner::new(0));
        assert_eq!(
            compiler.invocation(&request(Some("/usr/lib/ssl"))).render(),
            "/opt/toolchain-x64 bin/tool -o /build/.tool.partial --openssl-dir=/usr/lib/ssl --clean-tmpdir"
        );
    }

    #[test]
    fn test_invocation_without_cert_dir() {
        let compiler = ToolchainCompiler::new("rubyc", ToolRunner::new(0));
        let rendered = compiler.invocation(&request(None)).render();
        assert!(!rendered.contains("--openssl-dir"));
        assert!(rendered.ends_with("--clean-tmpdir"));
    }

    #[tokio::test]
    async fn test_detect_prefers_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolchainConfig::detect(
            &ToolRunner::new(5),
            &ExecContext::new(dir.path()),
            Some(Path::new("/etc/ssl")),
        )
        .await;
        assert_eq!(config.cert_dir, Some(PathBuf::from("/etc/ssl")));
    }

    #[tokio::test]
    async fn test_compile_executable_moves_and_marks() {
        let snapshot = snapshot_with_entry();
        let build = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::succeeding(b"\x7fELF".to_vec());

        let exe = compile_executable(
            &compiler,
            Path::new("bin/tool"),
            build.path(),
            "tool",
            &ToolchainConfig::default(),
            &ExecContext::new(snapshot.path()),
        )
        .await
        .unwrap();

        assert_eq!(exe, build.path().join("tool"));
        assert_eq!(std::fs::read(&exe).unwrap(), b"\x7fELF");
        assert!(!build.path().join(".tool.partial").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&exe).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
        let requests = compiler.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].entry_point, PathBuf::from("bin/tool"));
        assert_eq!(requests[0].context.cwd(), snapshot.path());
    }

    #[tokio::test]
    async fn test_compile_failure_leaves_no_output() {
        let snapshot = snapshot_with_entry();
        let build = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::failing("linker error");

        let err = compile_executable(
            &compiler,
            Path::new("bin/tool"),
            build.path(),
            "tool",
            &ToolchainConfig::default(),
            &ExecContext::new(snapshot.path()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PackageError::Compilation(ref m) if m.contains("linker error")));
        assert_eq!(std::fs::read_dir(build.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_entry_point() {
        let snapshot = tempfile::tempdir().unwrap();
        let build = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::succeeding(b"bin".to_vec());

        let err = compile_executable(
            &compiler,
            Path::new("bin/tool"),
            build.path(),
            "tool",
            &ToolchainConfig::default(),
            &ExecContext::new(snapshot.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PackageError::Compilation(_)));
        assert!(compiler.requests().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_toolchain_compiler_runs_external_program() {
        use std::os::unix::fs::PermissionsExt;

        let snapshot = snapshot_with_entry();
        let build = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let script = tools.path().join("toolchain-x64");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 -o) out=\"$2\"; shift 2 ;;\n\
                 *) shift ;;\n\
               esac\n\
             done\n\
             printf 'compiled' > \"$out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let compiler = ToolchainCompiler::new(&script, ToolRunner::new(30));
        let exe = compile_executable(
            &compiler,
            Path::new("bin/tool"),
            build.path(),
            "tool",
            &ToolchainConfig {
                cert_dir: Some(PathBuf::from("/usr/lib/ssl")),
            },
            &ExecContext::new(snapshot.path()),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(exe).unwrap(), "compiled");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_toolchain_nonzero_exit_is_compilation_error() {
        use std::os::unix::fs::PermissionsExt;

        let snapshot = snapshot_with_entry();
        let build = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let script = tools.path().join("toolchain-x64");
        std::fs::write(&script, "#!/bin/sh\necho 'undefined symbol' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let compiler = ToolchainCompiler::new(&script, ToolRunner::new(30));
        let err = compile_executable(
            &compiler,
            Path::new("bin/tool"),
            build.path(),
            "tool",
            &ToolchainConfig::default(),
            &ExecContext::new(snapshot.path()),
        )
        .await
        .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, PackageError::Compilation(_)));
        assert!(msg.contains("code 3"), "unexpected message: {msg}");
        assert!(msg.contains("undefined symbol"));
    }
}
