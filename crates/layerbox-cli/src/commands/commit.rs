//! `lbx commit`: Save a container's changes as a new image.

use anyhow::Context;
use clap::Args;
use layerbox_common::types::ContainerId;

use super::{GlobalArgs, open_engine};

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container ID.
    pub container: String,
}

/// Executes the `commit` command, printing the new image id.
///
/// # Errors
///
/// Returns an error if the container is unknown or its layer cannot be
/// copied.
pub fn execute(global: &GlobalArgs, args: CommitArgs) -> anyhow::Result<()> {
    let engine = open_engine(global)?;
    let id = ContainerId::new(args.container);
    let image = engine
        .commit(&id)
        .with_context(|| format!("failed to commit container {id}"))?;
    println!("{image}");
    Ok(())
}
