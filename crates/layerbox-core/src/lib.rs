//! # layerbox-core
//!
//! Low-level Linux isolation primitives for the layerbox runtime.
//!
//! This crate provides safe abstractions over:
//! - **Syscalls**: error-checked `mount`, `umount`, `unshare`, `setns`,
//!   `sethostname`, and `chroot`.
//! - **Namespaces**: the container namespace set and joining a running
//!   process's namespaces.
//! - **Cgroups**: memory and CPU limits on v1 and v2 hierarchies.
//! - **Filesystem**: `OverlayFS` roots, pseudo-filesystems, and tree copies.
//! - **Network**: named network namespaces, veth pairs on a host bridge.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod network;
pub mod syscall;
