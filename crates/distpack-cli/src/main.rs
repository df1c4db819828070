//! distpack - versioned release packaging
//!
//! ## Commands
//!
//! - `build`: Package a source tree at a version into
//!   `pkg/<version>/<name>-<version>-<platform>-x64.tar.gz`
//!
//! Exit codes follow the failing stage: `127` for configuration errors
//! (missing or unusable compiler), a distinct nonzero code for every other
//! failure kind, and `1` for anything unclassified.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use distpack_core::telemetry::{init_tracing, level_for};
use distpack_core::{BuildRequest, Collaborators, PackageConfig, PackageError, PackagePipeline};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "distpack")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Versioned release packaging for standalone CLI builds", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the release archive for a version
    Build(BuildArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Compiler toolchain that produces the standalone executable
    #[arg(env = "DISTPACK_COMPILER")]
    compiler: Option<PathBuf>,

    /// Version (git reference) to package; defaults to the current reference
    #[arg(env = "DISTPACK_VERSION")]
    version: Option<String>,

    /// Source tree to package
    #[arg(long, default_value = ".")]
    source: PathBuf,

    /// Root that receives pkg/ (default: the source tree)
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Package and executable name (default: source directory name)
    #[arg(long)]
    name: Option<String>,

    /// Entry point relative to the source tree (default: bin/<name>)
    #[arg(long)]
    entry: Option<PathBuf>,

    /// Timeout in seconds for each external tool (0 disables it)
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the build report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json, level_for(cli.verbose));

    let result = match cli.command {
        Commands::Build(args) => cmd_build(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match package_error(&e) {
                Some(pe) => eprintln!("error: {} stage failed: {e:#}", pe.stage()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Configuration for `args`: defaults, then `DISTPACK_*`, then flags.
fn resolve_config(args: &BuildArgs) -> Result<PackageConfig> {
    let mut config = PackageConfig::from_env(&args.source)?;
    if let Some(name) = &args.name {
        config = config.with_name(name.clone());
    }
    if let Some(entry) = &args.entry {
        config = config.with_entry_point(entry.clone());
    }
    if let Some(root) = &args.output_root {
        config = config.with_output_root(root.clone());
    }
    if let Some(secs) = args.timeout {
        config = config.with_timeout_secs(secs);
    }
    Ok(config)
}

async fn cmd_build(args: BuildArgs) -> Result<()> {
    let compiler = args.compiler.clone().ok_or_else(|| {
        PackageError::Configuration(
            "no compiler given; pass COMPILER or set DISTPACK_COMPILER".to_string(),
        )
    })?;
    let config = resolve_config(&args)?;
    let collaborators = Collaborators::real(&config)?;
    let pipeline = PackagePipeline::new(config, collaborators);

    let report = pipeline
        .run(&BuildRequest::new(compiler, args.version.clone()))
        .await?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{json}");
    } else {
        println!("{}", report.archive.display());
        info!("{}", report.summary());
    }
    Ok(())
}

fn package_error(err: &anyhow::Error) -> Option<&PackageError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PackageError>())
}

/// Process exit code for a failed command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    package_error(err).map(PackageError::exit_code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> BuildArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Build(args) => args,
        }
    }

    #[test]
    fn test_parse_positional_compiler_and_version() {
        let args = parse(&["distpack", "build", "./toolchain-x64", "2.3.0", "--json"]);
        assert_eq!(args.compiler, Some(PathBuf::from("./toolchain-x64")));
        assert_eq!(args.version.as_deref(), Some("2.3.0"));
        assert_eq!(args.source, PathBuf::from("."));
        assert!(args.json);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "distpack", "build", "./tc", "--verbose", "--log-json", "--timeout", "30",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.log_json);
        let Commands::Build(args) = cli.command;
        assert_eq!(args.timeout, Some(30));
    }

    #[test]
    fn test_flags_override_config() {
        let source = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let args = parse(&[
            "distpack",
            "build",
            "./tc",
            "--source",
            source.path().to_str().unwrap(),
            "--name",
            "hub",
            "--entry",
            "exe/hub",
            "--output-root",
            out.path().to_str().unwrap(),
            "--timeout",
            "45",
        ]);

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.name, "hub");
        assert_eq!(config.entry_point(), PathBuf::from("exe/hub"));
        assert_eq!(config.output_root(), out.path());
        assert_eq!(config.timeout_secs, 45);
    }

    #[test]
    fn test_exit_code_mapping() {
        let config: anyhow::Error = PackageError::Configuration("bad".to_string()).into();
        assert_eq!(exit_code_for(&config), 127);

        let wrapped = anyhow::Error::from(PackageError::Archive("disk full".to_string()))
            .context("while packaging");
        assert_eq!(exit_code_for(&wrapped), 12);

        let other = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&other), 1);
    }

    #[tokio::test]
    async fn test_missing_compiler_file_exits_127() {
        let source = tempfile::tempdir().unwrap();
        let missing = source.path().join("no-such-toolchain");
        let args = parse(&[
            "distpack",
            "build",
            missing.to_str().unwrap(),
            "2.3.0",
            "--source",
            source.path().to_str().unwrap(),
        ]);

        let err = cmd_build(args).await.unwrap_err();
        assert_eq!(exit_code_for(&err), 127);
        assert!(!source.path().join("pkg").exists());
    }
}
