//! Named network namespaces.
//!
//! A named namespace is a network namespace kept alive by a bind mount of
//! its `nsfs` file onto `<netns_dir>/<name>`, the same convention iproute2
//! uses, so `ip netns` sees layerbox namespaces and vice versa.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use layerbox_common::error::{LayerboxError, Result};
use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sched::CloneFlags;

use crate::syscall;

/// Creates the named namespace `name` under `dir` and returns its path.
///
/// The namespace is created on a short-lived helper thread, so the calling
/// thread's own network namespace never changes.
///
/// # Errors
///
/// Returns a network error if the name is taken, or a kernel/I/O error if
/// the namespace cannot be created or pinned.
pub fn create_named(dir: &Path, name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| LayerboxError::io(dir, e))?;
    ensure_shared(dir)?;

    let path = dir.join(name);
    let _ = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                LayerboxError::Network {
                    message: format!("network namespace {name} already exists"),
                }
            } else {
                LayerboxError::io(&path, e)
            }
        })?;

    let target = path.clone();
    let pinned = std::thread::spawn(move || -> Result<()> {
        syscall::unshare_namespaces(CloneFlags::CLONE_NEWNET)?;
        syscall::mount(
            Some("/proc/thread-self/ns/net"),
            &target,
            Some("none"),
            MsFlags::MS_BIND,
            None,
        )
    })
    .join()
    .unwrap_or_else(|_| {
        Err(LayerboxError::Network {
            message: format!("namespace helper thread for {name} panicked"),
        })
    });

    if let Err(e) = pinned {
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }
    tracing::info!(name, path = %path.display(), "network namespace created");
    Ok(path)
}

/// Makes `dir` a shared mount so namespace pins propagate to every mount
/// namespace cloned from this one.
fn ensure_shared(dir: &Path) -> Result<()> {
    let shared = MsFlags::MS_SHARED | MsFlags::MS_REC;
    match syscall::mount(None, dir, None, shared, None) {
        Err(e) if e.errno() == Some(Errno::EINVAL as i32) => {
            // Not a mount point yet.
            syscall::mount(
                Some(&dir.display().to_string()),
                dir,
                Some("none"),
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None,
            )?;
            syscall::mount(None, dir, None, shared, None)
        }
        other => other,
    }
}

/// Deletes the named namespace `name` under `dir`.
///
/// Returns `Ok(false)` when it did not exist.
///
/// # Errors
///
/// Returns an I/O error if the pin file cannot be removed.
pub fn delete_named(dir: &Path, name: &str) -> Result<bool> {
    let path = dir.join(name);
    if std::fs::symlink_metadata(&path).is_err() {
        return Ok(false);
    }
    let _ = syscall::unmount(&path, true)?;
    std::fs::remove_file(&path).map_err(|e| LayerboxError::io(&path, e))?;
    tracing::info!(name, "network namespace deleted");
    Ok(true)
}

/// Moves the calling thread into the network namespace pinned at `path`.
///
/// # Errors
///
/// Returns an I/O error if the pin cannot be opened, or a kernel error if
/// `setns(2)` fails.
pub fn join_named(path: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| LayerboxError::io(path, e))?;
    syscall::join_namespace(&file, CloneFlags::CLONE_NEWNET)
}
