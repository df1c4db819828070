//! External tool execution.
//!
//! Every collaborator that shells out (compiler, license scanner, openssl)
//! goes through [`ToolRunner`], which captures output, enforces the optional
//! per-invocation timeout, and never consults ambient process state.

use crate::context::ExecContext;
use crate::error::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Number of trailing diagnostic lines carried into error messages.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Configured command line (first element is the executable).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command from a program and arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// A concrete invocation, arguments may be arbitrary OS strings (paths).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Human-readable command line for logs and error messages.
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<&CommandSpec> for Invocation {
    fn from(spec: &CommandSpec) -> Self {
        Invocation::new(&spec.program).args(&spec.args)
    }
}

/// Result of a finished tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Rendered command line.
    pub command: String,

    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the process reported success.
    pub success: bool,
}

impl ToolOutput {
    /// Whether this invocation passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Tail of stderr, or of stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.trim_end().lines().collect();
        let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
        lines[start..].join("\n")
    }

    /// Turn a nonzero exit into the stage's error kind.
    pub fn require_success(self, kind: fn(String) -> PackageError) -> Result<ToolOutput> {
        if self.passed() {
            return Ok(self);
        }
        let diagnostic = self.diagnostic();
        let mut msg = format!("`{}` exited with code {}", self.command, self.exit_code);
        if !diagnostic.is_empty() {
            msg.push_str(":\n");
            msg.push_str(&diagnostic);
        }
        Err(kind(msg))
    }
}

/// Failures that prevent a tool from producing an exit status.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {secs} seconds")]
    TimedOut { command: String, secs: u64 },

    #[error("failed to collect output of `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs external tools sequentially with an optional timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolRunner {
    timeout: Option<Duration>,
}

impl ToolRunner {
    /// Create a runner; `timeout_secs == 0` disables the timeout.
    pub fn new(timeout_secs: u64) -> Self {
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        Self { timeout }
    }

    /// Configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Execute an invocation inside `ctx` and capture its output.
    pub async fn run(
        &self,
        invocation: &Invocation,
        ctx: &ExecContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let command = invocation.render();
        debug!(command = %command, cwd = %ctx.cwd().display(), "Running tool");

        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        ctx.apply(&mut cmd);

        let child = cmd.spawn().map_err(|source| ToolError::Spawn {
            command: command.clone(),
            source,
        })?;

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut {
                    command: command.clone(),
                    secs: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| ToolError::Wait {
            command: command.clone(),
            source,
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(command = %command, exit_code, duration_ms, "Tool finished");

        Ok(ToolOutput {
            command,
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }

    /// Execute and map both launch failures and nonzero exits to `kind`.
    pub async fn run_checked(
        &self,
        invocation: &Invocation,
        ctx: &ExecContext,
        kind: fn(String) -> PackageError,
    ) -> Result<ToolOutput> {
        self.run(invocation, ctx)
            .await
            .map_err(|e| kind(e.to_string()))?
            .require_success(kind)
    }
}
