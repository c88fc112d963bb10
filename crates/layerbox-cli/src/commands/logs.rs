//! `lbx logs`: Show the output of a detached container.

use clap::Args;
use layerbox_common::error::LayerboxError;
use layerbox_common::types::ContainerId;

use super::{GlobalArgs, open_engine};

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID.
    pub container: String,
}

/// Executes the `logs` command.
///
/// Copies the container's captured stdout and stderr to stdout.
///
/// # Errors
///
/// Returns an error if the container is not found or its log is unreadable.
pub fn execute(global: &GlobalArgs, args: LogsArgs) -> anyhow::Result<()> {
    let engine = open_engine(global)?;
    let id = ContainerId::new(args.container);
    let mut stdout = std::io::stdout().lock();
    let copied = match engine.logs(&id, &mut stdout) {
        Err(LayerboxError::NotFound { kind: "logs", .. }) => {
            anyhow::bail!("no logs found for container {id}; was it run detached?")
        }
        result => result?,
    };
    tracing::debug!(container = %id, bytes = copied, "logs copied");
    Ok(())
}
