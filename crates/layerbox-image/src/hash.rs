//! SHA-256 content verification.
//!
//! Validates the integrity of downloaded layer blobs.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::Sha256Hash;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of everything `reader` yields.
///
/// # Errors
///
/// Returns an I/O error (attributed to `origin`) if reading fails.
pub fn hash_reader(mut reader: impl Read, origin: &Path) -> Result<Sha256Hash> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| LayerboxError::io(origin, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Sha256Hash::from_hex(format!("{:x}", hasher.finalize()))
}

/// Computes the SHA-256 hash of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let file = File::open(path).map_err(|e| LayerboxError::io(path, e))?;
    hash_reader(file, path)
}

/// Validates that a file matches the expected SHA-256 hash.
///
/// # Errors
///
/// Returns `LayerboxError::HashMismatch` if the hashes do not match.
pub fn validate_hash(path: &Path, expected: &Sha256Hash) -> Result<()> {
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(LayerboxError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    tracing::debug!(path = %path.display(), hash = %actual, "hash verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hash_file_matches_known_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, "hello").expect("write");

        assert_eq!(hash_file(&path).expect("hash").as_hex(), HELLO_SHA256);
    }

    #[test]
    fn validate_hash_reports_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, "hello!").expect("write");
        let expected = Sha256Hash::from_hex(HELLO_SHA256).expect("hex");

        match validate_hash(&path, &expected) {
            Err(LayerboxError::HashMismatch { expected, .. }) => {
                assert_eq!(expected, format!("sha256:{HELLO_SHA256}"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn validate_hash_accepts_matching_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, "hello").expect("write");
        let expected = Sha256Hash::from_hex(format!("sha256:{HELLO_SHA256}")).expect("hex");

        validate_hash(&path, &expected).expect("valid");
    }
}
