//! `lbx exec`: Run a command inside a running container.

use clap::Args;
use layerbox_common::types::{ContainerId, ExecutionMode};
use layerbox_runtime::exec::{ExecOutcome, ExecRequest};

use super::{GlobalArgs, open_engine, require_root, split_command};

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Return immediately and print the command's pid; its output goes to
    /// the container log.
    #[arg(short, long)]
    pub detach: bool,

    /// Container ID.
    pub container: String,

    /// Command to execute and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Joins the target container's namespaces and runs the command. In the
/// foreground the process exits with the command's status.
///
/// # Errors
///
/// Returns an error if the container is not running or its namespaces
/// cannot be joined.
pub fn execute(global: &GlobalArgs, args: ExecArgs) -> anyhow::Result<()> {
    require_root("exec")?;
    let engine = open_engine(global)?;
    let id = ContainerId::new(args.container);
    let (command, rest) = split_command(args.command)?;
    let request = ExecRequest {
        command,
        args: rest,
        mode: if args.detach {
            ExecutionMode::Detached
        } else {
            ExecutionMode::Foreground
        },
    };

    match engine.exec(&id, &request)? {
        ExecOutcome::Detached(pid) => {
            println!("{pid}");
            Ok(())
        }
        ExecOutcome::Exited(status) => std::process::exit(status),
    }
}
