//! Pseudo-filesystems around the root switch, and their teardown.
//!
//! `/dev` and `/dev/pts` are mounted into the merged root before `chroot`;
//! `/proc` and `/sys` are mounted from inside the new root, once the PID
//! and network namespaces they reflect are in place.

use std::path::{Path, PathBuf};

use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::TeardownWarning;
use nix::mount::MsFlags;

use crate::syscall;

/// Mounts `devtmpfs` on `<rootfs>/dev` and a private `devpts` instance on
/// `<rootfs>/dev/pts`.
///
/// # Errors
///
/// Returns an error if a mount point cannot be created or a mount fails.
pub fn mount_device_filesystems(rootfs: &Path) -> Result<()> {
    let dev = rootfs.join("dev");
    create_mount_point(&dev)?;
    syscall::mount(
        Some("devtmpfs"),
        &dev,
        Some("devtmpfs"),
        MsFlags::MS_NOSUID,
        None,
    )?;

    let pts = dev.join("pts");
    create_mount_point(&pts)?;
    syscall::mount(
        Some("devpts"),
        &pts,
        Some("devpts"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
        Some("newinstance,ptmxmode=0666,mode=0620"),
    )?;
    Ok(())
}

/// Mounts `proc` and `sysfs` below `root`, normally `/` after the root
/// switch.
///
/// # Errors
///
/// Returns an error if a mount point cannot be created or a mount fails.
pub fn mount_kernel_filesystems(root: &Path) -> Result<()> {
    let proc = root.join("proc");
    create_mount_point(&proc)?;
    syscall::mount(
        Some("proc"),
        &proc,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None,
    )?;

    let sys = root.join("sys");
    create_mount_point(&sys)?;
    syscall::mount(
        Some("sysfs"),
        &sys,
        Some("sysfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None,
    )?;
    Ok(())
}

fn create_mount_point(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| LayerboxError::io(path, e))
}

/// Mount points of a container, in the order they must be unmounted.
#[must_use]
pub fn teardown_order(rootfs: &Path) -> [PathBuf; 5] {
    [
        rootfs.join("dev/pts"),
        rootfs.join("dev"),
        rootfs.join("sys"),
        rootfs.join("proc"),
        rootfs.to_path_buf(),
    ]
}

/// Unmounts everything a container mounted under `rootfs`.
///
/// Each target is attempted independently. Targets that are not mounted
/// (EINVAL) or do not exist (ENOENT) are skipped silently; any other
/// failure becomes a warning. Running it again is harmless.
#[must_use]
pub fn teardown_container_mounts(rootfs: &Path) -> Vec<TeardownWarning> {
    let mut warnings = Vec::new();
    for target in teardown_order(rootfs) {
        match syscall::unmount(&target, false) {
            Ok(_) => {}
            Err(e) if matches!(e.errno(), Some(libc::EINVAL | libc::ENOENT)) => {}
            Err(e) => {
                let warning = TeardownWarning::new(target.display().to_string(), &e);
                tracing::warn!(target = %target.display(), error = %e, "unmount failed");
                warnings.push(warning);
            }
        }
    }
    warnings
}
