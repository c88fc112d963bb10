//! Linux namespace management for container isolation.
//!
//! A new container unshares the mount, PID, UTS, IPC, and cgroup
//! namespaces; its network namespace is a named one created ahead of time
//! by [`crate::network`]. Attaching to a running container joins all six
//! namespaces of its init process in [`JOIN_ORDER`].

pub mod mount;

use std::fs::File;
use std::path::{Path, PathBuf};

use layerbox_common::error::{LayerboxError, Result};
use nix::sched::CloneFlags;

use crate::syscall;

/// A namespace type that can be unshared or joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Cgroup root view.
    Cgroup,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Mount table.
    Mount,
    /// Network stack.
    Network,
    /// Process ID numbering.
    Pid,
    /// Hostname and domain name.
    Uts,
}

impl NamespaceKind {
    /// Name of the namespace file under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Cgroup => "cgroup",
            Self::Ipc => "ipc",
            Self::Mount => "mnt",
            Self::Network => "net",
            Self::Pid => "pid",
            Self::Uts => "uts",
        }
    }

    /// Clone flag selecting this namespace type.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
        }
    }
}

/// Namespaces a freshly started container unshares.
pub const CONTAINER_NAMESPACES: [NamespaceKind; 5] = [
    NamespaceKind::Mount,
    NamespaceKind::Pid,
    NamespaceKind::Uts,
    NamespaceKind::Ipc,
    NamespaceKind::Cgroup,
];

/// Order in which a running container's namespaces are joined.
///
/// Joining the PID namespace only affects children forked afterwards.
pub const JOIN_ORDER: [NamespaceKind; 6] = [
    NamespaceKind::Cgroup,
    NamespaceKind::Ipc,
    NamespaceKind::Mount,
    NamespaceKind::Network,
    NamespaceKind::Pid,
    NamespaceKind::Uts,
];

/// Combines the clone flags of several namespace kinds.
#[must_use]
pub fn clone_flags(kinds: &[NamespaceKind]) -> CloneFlags {
    kinds
        .iter()
        .fold(CloneFlags::empty(), |acc, kind| acc | kind.clone_flag())
}

/// Moves the calling process into new container namespaces.
///
/// The PID namespace applies to children forked afterwards, not to the
/// caller itself.
///
/// # Errors
///
/// Returns a kernel error if `unshare(2)` fails.
pub fn unshare_container_namespaces() -> Result<()> {
    tracing::debug!(namespaces = ?CONTAINER_NAMESPACES, "unsharing container namespaces");
    syscall::unshare_namespaces(clone_flags(&CONTAINER_NAMESPACES))
}

/// Path of a process's namespace file below `proc_root`.
#[must_use]
pub fn namespace_path(proc_root: &Path, pid: i32, kind: NamespaceKind) -> PathBuf {
    proc_root
        .join(pid.to_string())
        .join("ns")
        .join(kind.proc_name())
}

/// Opens the namespace files of `pid` for every kind in `kinds`.
///
/// All files are opened before any is joined: after joining the mount
/// namespace the host's `/proc` may no longer be reachable.
///
/// # Errors
///
/// Returns an I/O error if any namespace file cannot be opened.
pub fn open_process_namespaces(
    proc_root: &Path,
    pid: i32,
    kinds: &[NamespaceKind],
) -> Result<Vec<(NamespaceKind, File)>> {
    kinds
        .iter()
        .map(|&kind| {
            let path = namespace_path(proc_root, pid, kind);
            File::open(&path)
                .map(|file| (kind, file))
                .map_err(|e| LayerboxError::io(path, e))
        })
        .collect()
}

/// Joins every opened namespace, in the order given.
///
/// # Errors
///
/// Returns a kernel error on the first `setns(2)` failure.
pub fn join_all(namespaces: &[(NamespaceKind, File)]) -> Result<()> {
    for (kind, file) in namespaces {
        syscall::join_namespace(file, kind.clone_flag())?;
    }
    Ok(())
}

/// Namespaces a supervisor returns to before releasing host resources.
///
/// PID comes first: once the container's init has exited, its PID
/// namespace refuses new members and every fork fails with `ENOMEM`.
pub const HOST_RETURN_ORDER: [NamespaceKind; 2] = [NamespaceKind::Pid, NamespaceKind::Mount];

/// Handles on the PID and mount namespaces a process started in.
///
/// Opened before unsharing. Entering them again resets the PID namespace
/// of future children to the host's, so cleanup can spawn `ip`, and makes
/// the host mount table (named network namespace pins) visible.
#[derive(Debug)]
pub struct HostNamespaces {
    namespaces: Vec<(NamespaceKind, File)>,
}

impl HostNamespaces {
    /// Opens the calling process's current PID and mount namespaces.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a file under `/proc/self/ns` cannot be
    /// opened.
    pub fn open_current() -> Result<Self> {
        let namespaces = HOST_RETURN_ORDER
            .iter()
            .map(|&kind| {
                let path = Path::new("/proc/self/ns").join(kind.proc_name());
                File::open(&path)
                    .map(|file| (kind, file))
                    .map_err(|e| LayerboxError::io(path, e))
            })
            .collect::<Result<_>>()?;
        Ok(Self { namespaces })
    }

    /// Kinds held, in the order they are entered.
    #[must_use]
    pub fn kinds(&self) -> Vec<NamespaceKind> {
        self.namespaces.iter().map(|(kind, _)| *kind).collect()
    }

    /// Re-enters the host PID and mount namespaces.
    ///
    /// The caller must be single-threaded.
    ///
    /// # Errors
    ///
    /// Returns a kernel error if `setns(2)` fails.
    pub fn enter(&self) -> Result<()> {
        join_all(&self.namespaces)
    }
}
