//! `lbx rm`: Remove a container that is not running.

use anyhow::Context;
use clap::Args;
use layerbox_common::types::ContainerId;

use super::{GlobalArgs, open_engine};

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container ID.
    pub container: String,
}

/// Executes the `rm` command.
///
/// Leftovers of a stale container are released first; anything that could
/// not be released is reported as a warning on stderr.
///
/// # Errors
///
/// Returns an error if the container is unknown or still running.
pub fn execute(global: &GlobalArgs, args: RmArgs) -> anyhow::Result<()> {
    let engine = open_engine(global)?;
    let id = ContainerId::new(args.container);
    let report = engine
        .remove_container(&id)
        .with_context(|| format!("failed to remove container {id}"))?;
    if !report.is_clean() {
        tracing::warn!(container = %id, leftovers = report.warnings.len(), "container removed with leftovers");
    }
    println!("{id}");
    Ok(())
}
