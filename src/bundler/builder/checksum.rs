//! Content hashing for staged files, bundles and lock verification.
//!
//! Everything is SHA-256, hex-encoded lower-case, read in fixed 1 MiB chunks
//! so memory stays flat for multi-hundred-megabyte bundles.

use crate::bundler::error::{ErrorExt, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Read buffer size used for hashing.
pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Hash of an empty or absent input, used as a placeholder.
pub const ZERO_SHA256: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Size and SHA-256 of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Hex-encoded SHA-256
    pub sha256: String,
    /// Bytes read
    pub size: u64,
}

/// Calculates the SHA-256 of a file, reading it in [`HASH_CHUNK_SIZE`] chunks.
///
/// # Returns
///
/// * `Ok(FileDigest)` - Hex-encoded hash (64 characters) and byte count
/// * `Err` - If the file cannot be opened or read
pub async fn calculate_sha256(file_path: &Path) -> Result<FileDigest> {
    let mut file = tokio::fs::File::open(file_path)
        .await
        .fs_context("opening file for hashing", file_path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .fs_context("reading file for hash calculation", file_path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        size += n as u64;
    }

    Ok(FileDigest {
        sha256: format!("{:x}", hasher.finalize()),
        size,
    })
}

/// SHA-256 of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Size in MiB rounded to four decimals, as recorded in the build lock.
pub fn format_mib(size_bytes: u64) -> f64 {
    (size_bytes as f64 / (1024.0 * 1024.0) * 10_000.0).round() / 10_000.0
}

/// Converts a MiB guard to bytes; non-positive or non-finite values yield `None`.
pub fn mib_to_bytes(mib: f64) -> Option<u64> {
    if !mib.is_finite() || mib <= 0.0 {
        return None;
    }
    let bytes = (mib * 1024.0 * 1024.0) as u64;
    (bytes > 0).then_some(bytes)
}
