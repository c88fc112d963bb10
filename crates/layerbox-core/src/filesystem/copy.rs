//! Metadata-preserving directory tree copy.
//!
//! Used to seed a root image from a host directory and to freeze a
//! container's writable layer into a new image. Symlinks are recreated,
//! never followed. Device nodes, FIFOs and sockets are recreated with
//! `mknod(2)`, which keeps overlay whiteouts (0/0 character devices)
//! intact across a commit.

use std::fs::{self, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use layerbox_common::error::{LayerboxError, Result};
use nix::sys::stat::{Mode, SFlag};

use crate::syscall::kernel_error;

/// Counts of what a copy produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Directories created, including the destination root.
    pub directories: u64,
    /// Regular files copied.
    pub files: u64,
    /// Symbolic links recreated.
    pub symlinks: u64,
    /// Device nodes, FIFOs and sockets recreated.
    pub special: u64,
}

/// Copies the tree rooted at `src` into `dst`, preserving modes, ownership,
/// and file types.
///
/// `dst` may already exist; existing entries are not removed first.
///
/// # Errors
///
/// Returns an error if `src` is not a directory or if any entry cannot be
/// read, created, or re-owned.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<CopyStats> {
    let meta = fs::symlink_metadata(src).map_err(|e| LayerboxError::io(src, e))?;
    if !meta.is_dir() {
        return Err(LayerboxError::Config {
            message: format!("source path is not a directory: {}", src.display()),
        });
    }
    let mut stats = CopyStats::default();
    copy_dir(src, dst, &meta, &mut stats)?;
    tracing::debug!(
        src = %src.display(),
        dst = %dst.display(),
        files = stats.files,
        directories = stats.directories,
        "tree copied"
    );
    Ok(stats)
}

fn copy_dir(src: &Path, dst: &Path, meta: &fs::Metadata, stats: &mut CopyStats) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| LayerboxError::io(dst, e))?;
    stats.directories += 1;

    let entries = fs::read_dir(src).map_err(|e| LayerboxError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| LayerboxError::io(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let child = fs::symlink_metadata(&from).map_err(|e| LayerboxError::io(&from, e))?;
        let file_type = child.file_type();

        if file_type.is_dir() {
            copy_dir(&from, &to, &child, stats)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&from).map_err(|e| LayerboxError::io(&from, e))?;
            std::os::unix::fs::symlink(&target, &to).map_err(|e| LayerboxError::io(&to, e))?;
            set_owner(&to, &child)?;
            stats.symlinks += 1;
        } else if file_type.is_file() {
            let _ = fs::copy(&from, &to).map_err(|e| LayerboxError::io(&to, e))?;
            set_owner(&to, &child)?;
            set_mode(&to, &child)?;
            stats.files += 1;
        } else {
            make_node(&to, &child)?;
            set_owner(&to, &child)?;
            stats.special += 1;
        }
    }

    // Applied last so a read-only directory can still be populated.
    set_owner(dst, meta)?;
    set_mode(dst, meta)
}

fn set_owner(path: &Path, meta: &fs::Metadata) -> Result<()> {
    std::os::unix::fs::lchown(path, Some(meta.uid()), Some(meta.gid()))
        .map_err(|e| LayerboxError::io(path, e))
}

fn set_mode(path: &Path, meta: &fs::Metadata) -> Result<()> {
    fs::set_permissions(path, Permissions::from_mode(meta.mode() & 0o7777))
        .map_err(|e| LayerboxError::io(path, e))
}

fn make_node(path: &Path, meta: &fs::Metadata) -> Result<()> {
    let kind = SFlag::from_bits_truncate(meta.mode() & SFlag::S_IFMT.bits());
    let perm = Mode::from_bits_truncate(meta.mode() & 0o7777);
    nix::sys::stat::mknod(path, kind, perm, meta.rdev())
        .map_err(|e| kernel_error(format!("mknod({})", path.display()), e))
}
