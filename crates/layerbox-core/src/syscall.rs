//! Error-checked bindings to the kernel transitions a container needs.
//!
//! Each wrapper either succeeds silently or returns
//! [`LayerboxError::Kernel`] carrying the errno and a description of the
//! attempted operation. Nothing here retries: a half-applied namespace or
//! mount change is not safe to repeat blindly.

use std::os::fd::AsFd;
use std::path::Path;

use layerbox_common::error::{LayerboxError, Result};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;

/// Converts a failed syscall into a typed kernel error.
pub fn kernel_error(operation: impl Into<String>, errno: Errno) -> LayerboxError {
    LayerboxError::Kernel {
        operation: operation.into(),
        errno: errno as i32,
        description: errno.desc().to_string(),
    }
}

/// Mounts `source` on `target` with the given filesystem type, flags, and data.
///
/// # Errors
///
/// Returns a kernel error if `mount(2)` fails.
pub fn mount(
    source: Option<&str>,
    target: &Path,
    fs_type: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    nix::mount::mount(source, target, fs_type, flags, data).map_err(|e| {
        kernel_error(
            format!(
                "mount({}, {}, {})",
                source.unwrap_or("none"),
                target.display(),
                fs_type.unwrap_or("none")
            ),
            e,
        )
    })?;
    tracing::debug!(
        source = source.unwrap_or("none"),
        target = %target.display(),
        fs_type = fs_type.unwrap_or("none"),
        "mounted"
    );
    Ok(())
}

/// Unmounts `target`, detaching lazily if it is still busy.
///
/// Returns whether something was unmounted. With `ignore_errors` set, a
/// failure is logged and reported as `Ok(false)`.
///
/// # Errors
///
/// Returns a kernel error if `umount2(2)` fails and `ignore_errors` is false.
pub fn unmount(target: &Path, ignore_errors: bool) -> Result<bool> {
    match nix::mount::umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(target = %target.display(), "unmounted");
            Ok(true)
        }
        Err(e) if ignore_errors => {
            tracing::debug!(target = %target.display(), error = %e, "unmount ignored");
            Ok(false)
        }
        Err(e) => Err(kernel_error(format!("umount({})", target.display()), e)),
    }
}

/// Moves the calling process into fresh namespaces of the given kinds.
///
/// # Errors
///
/// Returns a kernel error if `unshare(2)` fails.
pub fn unshare_namespaces(flags: CloneFlags) -> Result<()> {
    nix::sched::unshare(flags).map_err(|e| kernel_error(format!("unshare({flags:?})"), e))?;
    tracing::debug!(?flags, "namespaces unshared");
    Ok(())
}

/// Joins the namespace referred to by an open `/proc/<pid>/ns/*` (or
/// bind-mounted namespace) file.
///
/// # Errors
///
/// Returns a kernel error if `setns(2)` fails.
pub fn join_namespace<Fd: AsFd>(fd: Fd, ns_type: CloneFlags) -> Result<()> {
    nix::sched::setns(fd, ns_type).map_err(|e| kernel_error(format!("setns({ns_type:?})"), e))?;
    tracing::debug!(?ns_type, "namespace joined");
    Ok(())
}

/// Sets the hostname of the current UTS namespace.
///
/// # Errors
///
/// Returns a kernel error if `sethostname(2)` fails.
pub fn set_hostname(name: &str) -> Result<()> {
    nix::unistd::sethostname(name).map_err(|e| kernel_error(format!("sethostname({name})"), e))?;
    tracing::debug!(hostname = name, "hostname set");
    Ok(())
}

/// Changes the root directory to `new_root` and moves the working directory
/// to the new `/`.
///
/// # Errors
///
/// Returns a kernel error if `chroot(2)` or `chdir(2)` fails.
pub fn change_root(new_root: &Path) -> Result<()> {
    nix::unistd::chroot(new_root)
        .map_err(|e| kernel_error(format!("chroot({})", new_root.display()), e))?;
    nix::unistd::chdir("/").map_err(|e| kernel_error("chdir(/)", e))?;
    tracing::debug!(root = %new_root.display(), "root changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_error_carries_errno_and_description() {
        let err = kernel_error("mount(overlay, /x, overlay)", Errno::EINVAL);
        match err {
            LayerboxError::Kernel {
                operation,
                errno,
                description,
            } => {
                assert_eq!(operation, "mount(overlay, /x, overlay)");
                assert_eq!(errno, libc::EINVAL);
                assert!(!description.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unmount_with_ignore_errors_never_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Not a mount point: EINVAL as root, EPERM otherwise. Both are swallowed.
        assert!(!unmount(dir.path(), true).expect("ignored"));
    }

    #[test]
    fn unmount_reports_errno_when_not_ignoring() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = unmount(dir.path(), false).expect_err("not a mount point");
        assert!(err.errno().is_some());
        assert!(err.to_string().contains("umount("));
    }
}
