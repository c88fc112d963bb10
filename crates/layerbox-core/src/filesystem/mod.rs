//! Filesystem management for container isolation.
//!
//! Provides the `OverlayFS` container root, the pseudo-filesystems mounted
//! around the root switch, and a metadata-preserving tree copy used when
//! importing and committing image layers.

pub mod copy;
pub mod mount;
pub mod overlayfs;
