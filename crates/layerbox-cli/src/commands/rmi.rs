//! `lbx rmi`: Remove an image.

use anyhow::Context;
use clap::Args;
use layerbox_common::types::ImageId;

use super::{GlobalArgs, open_engine};

/// Arguments for the `rmi` command.
#[derive(Args, Debug)]
pub struct RmiArgs {
    /// Image ID.
    pub image: String,
}

/// Executes the `rmi` command.
///
/// # Errors
///
/// Returns an error if the image is unknown or still in use by a container
/// or a child image.
pub fn execute(global: &GlobalArgs, args: RmiArgs) -> anyhow::Result<()> {
    let engine = open_engine(global)?;
    let id = ImageId::new(args.image);
    engine
        .remove_image(&id)
        .with_context(|| format!("failed to remove image {id}"))?;
    println!("{id}");
    Ok(())
}
