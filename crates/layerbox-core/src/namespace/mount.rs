//! Mount propagation inside a freshly unshared mount namespace.

use std::path::Path;

use layerbox_common::error::Result;
use nix::mount::MsFlags;

use crate::syscall;

/// Marks every mount in the current namespace as a recursive slave.
///
/// Mounts made afterwards stay inside this namespace, while mount events on
/// the host still propagate in.
///
/// # Errors
///
/// Returns a kernel error if the propagation change is rejected.
pub fn make_root_slave() -> Result<()> {
    syscall::mount(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_REC | MsFlags::MS_SLAVE,
        None,
    )
}
