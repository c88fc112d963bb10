//! CFS bandwidth control files.

use std::path::Path;

use layerbox_common::error::Result;

use super::{CgroupLayout, write_control};

/// Writes a CFS period and quota.
///
/// On v1 the period is written before the quota, since the kernel validates
/// the quota against the current period. A missing quota is `-1` on v1 and
/// `max` on v2.
///
/// # Errors
///
/// Returns an I/O error if a control file cannot be written.
pub fn write_quota(
    dir: &Path,
    layout: CgroupLayout,
    period_us: u64,
    quota_us: Option<u64>,
) -> Result<()> {
    match layout {
        CgroupLayout::V1 => {
            write_control(dir, "cpu.cfs_period_us", &period_us.to_string())?;
            let quota = quota_us.map_or_else(|| "-1".to_string(), |q| q.to_string());
            write_control(dir, "cpu.cfs_quota_us", &quota)
        }
        CgroupLayout::V2 => {
            let quota = quota_us.map_or_else(|| "max".to_string(), |q| q.to_string());
            write_control(dir, "cpu.max", &format!("{quota} {period_us}"))
        }
    }
}
