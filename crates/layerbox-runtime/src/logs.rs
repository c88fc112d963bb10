//! Container log files.
//!
//! Detached containers and detached exec commands write straight into
//! `containers/<id>/logs` through their stdout and stderr descriptors;
//! nothing is buffered by the runtime.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::ContainerId;

/// Permissions of newly created log files; container output may hold
/// secrets.
pub const LOG_FILE_MODE: u32 = 0o600;

/// Opens `path` for appending, creating it owner-only if needed.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened.
pub fn open_for_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(LOG_FILE_MODE)
        .open(path)
        .map_err(|e| LayerboxError::io(path, e))
}

/// Copies the log of container `id` at `path` into `out` and returns the
/// number of bytes.
///
/// # Errors
///
/// Returns `NotFound` if the container never wrote a log (it was not run
/// detached), or an I/O error if the file cannot be read or `out` cannot
/// be written.
pub fn copy_logs(id: &ContainerId, path: &Path, out: &mut dyn Write) -> Result<u64> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LayerboxError::NotFound {
                kind: "logs",
                id: id.to_string(),
            });
        }
        Err(e) => return Err(LayerboxError::io(path, e)),
    };
    std::io::copy(&mut file, out).map_err(|e| LayerboxError::io(path, e))
}
