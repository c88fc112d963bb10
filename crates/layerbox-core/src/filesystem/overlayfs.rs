//! `OverlayFS` management for layered container filesystems.
//!
//! Stacks the read-only image chain under a single writable upper layer,
//! so every container gets copy-on-write access to a shared image.

use std::path::{Path, PathBuf};

use layerbox_common::error::{LayerboxError, Result};
use nix::mount::MsFlags;

use crate::syscall;

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers, most specific first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`; same filesystem as `upper_dir`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Renders the mount data string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if there are no lower layers, or if a
    /// path contains a character that the option syntax reserves.
    pub fn options(&self) -> Result<String> {
        if self.lower_dirs.is_empty() {
            return Err(LayerboxError::Config {
                message: "overlay mount needs at least one lower layer".into(),
            });
        }
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| option_path(p))
            .collect::<Result<Vec<_>>>()?
            .join(":");
        Ok(format!(
            "lowerdir={lowers},upperdir={},workdir={}",
            option_path(&self.upper_dir)?,
            option_path(&self.work_dir)?
        ))
    }
}

fn option_path(path: &Path) -> Result<String> {
    let rendered = path.display().to_string();
    if rendered.contains([',', ':']) {
        return Err(LayerboxError::Config {
            message: format!("overlay layer path contains ',' or ':': {rendered}"),
        });
    }
    Ok(rendered)
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the upper, work, and merged directories if they do not exist.
///
/// # Errors
///
/// Returns an error if directory creation fails, the options are invalid,
/// or the kernel rejects the mount.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    for dir in [&config.upper_dir, &config.work_dir, &config.merged_dir] {
        std::fs::create_dir_all(dir).map_err(|e| LayerboxError::io(dir, e))?;
    }
    let options = config.options()?;

    syscall::mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(&options),
    )?;

    tracing::info!(
        merged = %config.merged_dir.display(),
        layers = config.lower_dirs.len(),
        "overlayfs mounted"
    );
    Ok(())
}
