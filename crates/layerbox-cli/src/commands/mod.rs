//! CLI command definitions and dispatch.

pub mod commit;
pub mod exec;
pub mod images;
pub mod init;
pub mod logs;
pub mod ps;
pub mod pull;
pub mod rm;
pub mod rmi;
pub mod run;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use layerbox_common::config::RuntimeConfig;
use layerbox_runtime::engine::Engine;

/// layerbox: daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "lbx", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Base directory for images and containers.
    #[arg(long, global = true, env = "LAYERBOX_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long, global = true, env = "LAYERBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Diagnostic output format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Diagnostic output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a root image from a host directory.
    Init(init::InitArgs),
    /// Download an image from Docker Hub.
    Pull(pull::PullArgs),
    /// Run a command in a new container.
    Run(run::RunArgs),
    /// Run a command inside a running container.
    Exec(exec::ExecArgs),
    /// Save a container's changes as a new image.
    Commit(commit::CommitArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Remove a container that is not running.
    Rm(rm::RmArgs),
    /// Remove an image.
    Rmi(rmi::RmiArgs),
    /// List images.
    Images(images::ImagesArgs),
    /// Show the output of a detached container.
    Logs(logs::LogsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global;
    match cli.command {
        Command::Init(args) => init::execute(&global, args),
        Command::Pull(args) => pull::execute(&global, args),
        Command::Run(args) => run::execute(&global, args),
        Command::Exec(args) => exec::execute(&global, args),
        Command::Commit(args) => commit::execute(&global, args),
        Command::Ps(args) => ps::execute(&global, &args),
        Command::Rm(args) => rm::execute(&global, args),
        Command::Rmi(args) => rmi::execute(&global, args),
        Command::Images(args) => images::execute(&global, args),
        Command::Logs(args) => logs::execute(&global, args),
    }
}

/// Loads the configuration and opens the engine.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the data directory
/// cannot be opened.
pub fn open_engine(global: &GlobalArgs) -> anyhow::Result<Engine> {
    let config = RuntimeConfig::load(global.config.as_deref(), global.data_dir.as_deref())
        .context("failed to load configuration")?;
    let data_dir = config.data_dir.clone();
    Engine::new(config).with_context(|| format!("failed to open data directory {}", data_dir.display()))
}

/// Fails unless running as root; namespaces, mounts, and cgroups need it.
///
/// # Errors
///
/// Returns an error naming `command` for unprivileged callers.
pub fn require_root(command: &str) -> anyhow::Result<()> {
    if nix::unistd::geteuid().is_root() {
        return Ok(());
    }
    anyhow::bail!("`lbx {command}` must be run as root")
}

/// Splits a trailing command line into the command and its arguments.
///
/// # Errors
///
/// Returns an error if the command line is empty.
pub fn split_command(mut command_line: Vec<String>) -> anyhow::Result<(String, Vec<String>)> {
    if command_line.is_empty() {
        anyhow::bail!("no command given");
    }
    let command = command_line.remove(0);
    Ok((command, command_line))
}
