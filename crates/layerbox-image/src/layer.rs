//! Layer archive extraction.
//!
//! Registry blobs carry no file extension, so compression is detected from
//! the archive's leading bytes. Entries are unpacked as-is: whiteout files
//! keep their archive names.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::Sha256Hash;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A single extracted filesystem layer.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Hash of the archive the layer was extracted from.
    pub hash: Sha256Hash,
    /// Size of the archive in bytes.
    pub size_bytes: u64,
}

/// Extracts a tar archive, optionally gzip-compressed, into `target`.
///
/// Permissions recorded in the archive are preserved; ownership is too when
/// running as root.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or unpacked.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<Layer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );
    std::fs::create_dir_all(target).map_err(|e| LayerboxError::io(target, e))?;

    let mut file = File::open(archive_path).map_err(|e| LayerboxError::io(archive_path, e))?;
    let size_bytes = file
        .metadata()
        .map_err(|e| LayerboxError::io(archive_path, e))?
        .len();
    let gzip = is_gzip(&mut file).map_err(|e| LayerboxError::io(archive_path, e))?;

    if gzip {
        unpack(tar::Archive::new(flate2::read::GzDecoder::new(file)), target)?;
    } else {
        unpack(tar::Archive::new(file), target)?;
    }

    let hash = crate::hash::hash_file(archive_path)?;
    tracing::info!(hash = %hash, size = size_bytes, "layer extracted");
    Ok(Layer { hash, size_bytes })
}

fn unpack<R: Read>(mut archive: tar::Archive<R>, target: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(nix::unistd::geteuid().is_root());
    archive.set_overwrite(true);
    archive.unpack(target).map_err(|e| LayerboxError::io(target, e))
}

/// Peeks at the first two bytes and rewinds.
fn is_gzip(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    let _ = file.seek(SeekFrom::Start(0))?;
    Ok(gzip)
}
