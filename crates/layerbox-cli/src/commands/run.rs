//! `lbx run`: Run a command in a new container.

use clap::Args;
use layerbox_common::constants::DEFAULT_CPU_PERIOD_US;
use layerbox_common::types::{ContainerLimits, ExecutionMode, ImageId};
use layerbox_runtime::lifecycle::{RunOutcome, RunRequest};

use super::{GlobalArgs, open_engine, require_root, split_command};
use crate::limits;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Return immediately and print the container id.
    #[arg(short, long)]
    pub detach: bool,

    /// Memory ceiling, e.g. `512m` or `1g`.
    #[arg(short, long, value_parser = limits::parse_memory)]
    pub memory_limit: Option<u64>,

    /// CPU ceiling in cores, e.g. `0.5c`.
    #[arg(short, long, value_parser = limits::parse_cpu)]
    pub cpu_limit: Option<u64>,

    /// Image to build the container root from.
    pub image: String,

    /// Command and its arguments; the command is resolved against the
    /// container's `PATH`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// In the foreground the process exits with the container command's
/// status; detached, the container id is printed.
///
/// # Errors
///
/// Returns an error if the container cannot be created or started.
pub fn execute(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    require_root("run")?;
    let engine = open_engine(global)?;

    let (command, rest) = split_command(args.command)?;
    let request = RunRequest {
        image: ImageId::new(args.image),
        command,
        args: rest,
        limits: ContainerLimits {
            memory_bytes: args.memory_limit,
            cpu_period_us: DEFAULT_CPU_PERIOD_US,
            cpu_quota_us: args.cpu_limit,
        },
        mode: if args.detach {
            ExecutionMode::Detached
        } else {
            ExecutionMode::Foreground
        },
    };

    match engine.run(&request)? {
        RunOutcome::Detached(id) => {
            println!("{id}");
            Ok(())
        }
        RunOutcome::Exited { id, status, teardown } => {
            tracing::debug!(
                container = %id,
                status,
                clean = teardown.is_clean(),
                "foreground container finished"
            );
            std::process::exit(status);
        }
    }
}
