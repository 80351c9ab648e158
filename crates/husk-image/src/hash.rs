//! SHA-256 content verification.
//!
//! Registry layer IDs are not content digests, so the digest of each layer
//! archive is computed after download and recorded next to it. Cached layers
//! are checked against that record before they are extracted.

use std::io::Read;
use std::path::Path;

use husk_common::error::{HuskError, Result};
use husk_common::types::Sha256Hash;
use sha2::{Digest, Sha256};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Computes the SHA-256 hash of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| HuskError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| HuskError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Sha256Hash::from_hex(format!("{:x}", hasher.finalize()))
}

/// Validates that a file matches the expected SHA-256 hash.
///
/// # Errors
///
/// Returns `HuskError::HashMismatch` if the hashes do not match.
pub fn validate_hash(path: &Path, expected: &Sha256Hash) -> Result<()> {
    tracing::debug!(path = %path.display(), "validating SHA-256 hash");
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(HuskError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Writes a digest record file.
///
/// # Errors
///
/// Returns an error if the record cannot be written.
pub fn write_digest(record: &Path, hash: &Sha256Hash) -> Result<()> {
    std::fs::write(record, format!("{}\n", hash.as_hex())).map_err(|e| HuskError::io(record, e))
}

/// Reads a digest record file, returning `None` when there is none.
///
/// # Errors
///
/// Returns an error if the record exists but is unreadable or malformed.
pub fn read_digest(record: &Path) -> Result<Option<Sha256Hash>> {
    match std::fs::read_to_string(record) {
        Ok(content) => Sha256Hash::from_hex(content).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HuskError::io(record, e)),
    }
}
