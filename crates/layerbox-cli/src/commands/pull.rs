//! `lbx pull`: Download an image from Docker Hub.

use anyhow::Context;
use clap::Args;
use layerbox_image::registry::{DockerHubRegistry, ImageReference};

use super::{GlobalArgs, open_engine};

/// Arguments for the `pull` command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image name with optional tag, e.g. `alpine` or `library/busybox:1.36`.
    pub name: String,
}

/// Executes the `pull` command, printing the leaf image id.
///
/// Ctrl+C removes the partially downloaded layers before exiting.
///
/// # Errors
///
/// Returns an error if the name is invalid or the download or import fails.
pub fn execute(global: &GlobalArgs, args: PullArgs) -> anyhow::Result<()> {
    let reference = ImageReference::parse(&args.name)?;
    let engine = open_engine(global)?;
    let registry = DockerHubRegistry::new()?;

    let scratch = engine.pull_scratch_dir();
    ctrlc::set_handler(move || {
        let _ = std::fs::remove_dir_all(&scratch);
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let id = engine
        .pull_image(&reference, &registry)
        .with_context(|| format!("failed to pull {reference}"))?;
    println!("{id}");
    Ok(())
}
