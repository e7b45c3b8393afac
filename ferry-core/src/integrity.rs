//! Whole-file integrity: streaming SHA-256 digest plus byte count.

use std::io::Read;

use sha2::{Digest, Sha256};

const READ_BUF: usize = 64 * 1024;

/// Expected size and checksum of a complete file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDigest {
    pub size_bytes: u64,
    pub checksum: [u8; 32],
}

/// Single streaming pass over `reader`: hash every byte in order and count
/// the total. Memory use is bounded regardless of file size.
pub fn compute_meta<R: Read>(mut reader: R) -> std::io::Result<FileDigest> {
    let mut hasher = Sha256::new();
    let mut size_bytes = 0u64;
    let mut buf = [0u8; READ_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size_bytes += n as u64;
    }
    Ok(FileDigest {
        size_bytes,
        checksum: hasher.finalize().into(),
    })
}

/// Recompute size and checksum of `reader` and compare against `expected`.
/// Both fields must match; a size match with a checksum mismatch (or the
/// reverse) is still a failure.
pub fn verify<R: Read>(reader: R, expected: &FileDigest) -> std::io::Result<bool> {
    Ok(compute_meta(reader)? == *expected)
}
