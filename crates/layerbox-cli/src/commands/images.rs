//! `lbx images`: List images.

use clap::Args;

use super::{GlobalArgs, open_engine};
use crate::output::{format_created, or_missing};

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Print image ids only.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the image store cannot be read.
pub fn execute(global: &GlobalArgs, args: ImagesArgs) -> anyhow::Result<()> {
    let engine = open_engine(global)?;
    let images = engine.list_images()?;

    if args.quiet {
        for image in &images {
            println!("{}", image.id);
        }
        return Ok(());
    }

    println!("{:<38} {:<38} {:<20}", "IMAGE ID", "PARENT", "CREATED");
    for image in &images {
        println!(
            "{:<38} {:<38} {:<20}",
            image.id,
            or_missing(image.parent.as_ref()),
            format_created(image.created)
        );
    }
    Ok(())
}
