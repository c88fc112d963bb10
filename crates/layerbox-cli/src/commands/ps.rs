//! `lbx ps`: List containers.

use clap::Args;

use super::{GlobalArgs, open_engine};
use crate::output::{format_created, or_missing};

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including exited and stale ones).
    #[arg(short, long)]
    pub all: bool,

    /// Print container ids only.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Executes the `ps` command.
///
/// Reads every container record and displays them in a tabular format.
///
/// # Errors
///
/// Returns an error if the container records cannot be read.
pub fn execute(global: &GlobalArgs, args: &PsArgs) -> anyhow::Result<()> {
    let engine = open_engine(global)?;
    let containers = engine.list_containers(args.all)?;

    if args.quiet {
        for c in &containers {
            println!("{}", c.id);
        }
        return Ok(());
    }

    println!(
        "{:<38} {:<38} {:<8} {:<8} {:<20}",
        "CONTAINER ID", "IMAGE", "STATE", "PID", "CREATED"
    );
    for c in &containers {
        println!(
            "{:<38} {:<38} {:<8} {:<8} {:<20}",
            c.id,
            or_missing(c.image.as_ref()),
            c.state,
            or_missing(c.pid),
            format_created(c.created)
        );
    }
    Ok(())
}
