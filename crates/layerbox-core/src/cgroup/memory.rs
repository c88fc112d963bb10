//! Memory ceiling control files.

use std::path::Path;

use layerbox_common::constants::PAGE_MASK;
use layerbox_common::error::Result;

use super::{CgroupLayout, write_control};

/// Rounds a byte count down to a page boundary.
#[must_use]
pub const fn page_align(bytes: u64) -> u64 {
    bytes & PAGE_MASK
}

/// Writes a hard memory limit (`memory.limit_in_bytes` on v1, `memory.max`
/// on v2).
///
/// # Errors
///
/// Returns an I/O error if the control file cannot be written.
pub fn write_limit(dir: &Path, layout: CgroupLayout, bytes: u64) -> Result<()> {
    let file = match layout {
        CgroupLayout::V1 => "memory.limit_in_bytes",
        CgroupLayout::V2 => "memory.max",
    };
    write_control(dir, file, &bytes.to_string())
}
