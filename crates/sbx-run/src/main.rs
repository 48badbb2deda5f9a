//! Runs a command inside a target root filesystem, the way image build steps do.

#![cfg(target_os = "linux")]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sandbox_core::{Error, IsolationMode, RunFile, Runner};

/// Command line arguments for sbx-run
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON run file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug mode
    #[arg(long)]
    debug: bool,

    /// Label prefixed to every captured output line
    #[arg(long)]
    label: Option<String>,

    /// Root filesystem to run in
    #[arg(long, value_name = "DIR")]
    chroot: Option<PathBuf>,

    /// Architecture of the root filesystem (e.g. armhf, arm64)
    #[arg(long)]
    arch: Option<String>,

    /// Isolation: none, classic-chroot or namespace-container
    #[arg(long, value_name = "MODE")]
    method: Option<IsolationMode>,

    /// Working directory of the launched process
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Host path to share with the container, optionally at another location
    #[arg(long = "bind", value_name = "SRC[:DST]")]
    binds: Vec<String>,

    /// Environment variable for the command
    #[arg(long = "setenv", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<String>,

    /// Command and arguments to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn parse_env(value: &str) -> std::result::Result<String, String> {
    match value.split_once('=') {
        Some((key, _)) if !key.is_empty() => Ok(value.to_string()),
        _ => Err(format!("expected KEY=VALUE, got '{value}'")),
    }
}

/// Split `SRC[:DST]` into its parts.
fn parse_bind(spec: &str) -> (PathBuf, Option<PathBuf>) {
    match spec.split_once(':') {
        Some((source, target)) if !target.is_empty() => {
            (PathBuf::from(source), Some(PathBuf::from(target)))
        }
        Some((source, _)) => (PathBuf::from(source), None),
        None => (PathBuf::from(spec), None),
    }
}

impl Args {
    /// The run file named by `--config`, with command line overrides applied.
    fn into_run(self) -> Result<RunFile> {
        let mut run = match &self.config {
            Some(path) => RunFile::load(path)
                .with_context(|| format!("Failed to load run file {}", path.display()))?,
            None => RunFile::default(),
        };

        let cmd = &mut run.command;
        if let Some(root) = self.chroot {
            cmd.chroot = Some(root);
        }
        if let Some(arch) = self.arch {
            cmd.architecture = arch;
        }
        if let Some(method) = self.method {
            cmd.method = method;
        }
        if let Some(dir) = self.dir {
            cmd.dir = Some(dir);
        }
        for spec in &self.binds {
            let (source, target) = parse_bind(spec);
            cmd.add_bind_mount(source, target.as_deref());
        }
        for assignment in self.env {
            cmd.add_env(assignment);
        }

        if !self.command.is_empty() {
            run.argv = self.command;
        }
        if self.label.is_some() {
            run.label = self.label;
        }
        Ok(run)
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: Args) -> Result<()> {
    let run = args.into_run()?;
    if run.argv.is_empty() {
        bail!("No command specified to run");
    }

    let label = run
        .label
        .clone()
        .unwrap_or_else(|| run.argv[0].clone());
    let runner = Runner::new().with_tools(run.tools.clone());

    runner
        .run(&run.command, &label, &run.argv)
        .with_context(|| format!("{label} failed"))?;

    info!("{} finished", label);
    Ok(())
}

/// Exit code of the child behind `err`, if the run failed because it exited
/// unsuccessfully.
fn child_exit_code(err: &anyhow::Error) -> Option<i32> {
    err.downcast_ref::<Error>().and_then(Error::exit_code)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    match run(args) {
        Err(err) => match child_exit_code(&err) {
            Some(code) => {
                error!("{:#}", err);
                std::process::exit(code);
            }
            None => Err(err),
        },
        ok => ok,
    }
}
