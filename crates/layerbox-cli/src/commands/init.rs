//! `lbx init`: Create a root image from a host directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use super::{GlobalArgs, open_engine};

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory whose contents become the image's root filesystem.
    pub path: PathBuf,
}

/// Executes the `init` command, printing the new image id.
///
/// # Errors
///
/// Returns an error if the directory is missing or cannot be copied.
pub fn execute(global: &GlobalArgs, args: InitArgs) -> anyhow::Result<()> {
    let engine = open_engine(global)?;
    let id = engine
        .init_image(&args.path)
        .with_context(|| format!("failed to create image from {}", args.path.display()))?;
    println!("{id}");
    Ok(())
}
