//! Content fingerprints for dropped files
//!
//! A file's fingerprint is the lowercase hex SHA-256 digest of its bytes. Two
//! files with identical content share a fingerprint regardless of their name.

use sha2::{Digest, Sha256};

/// Fingerprint an in-memory buffer
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
