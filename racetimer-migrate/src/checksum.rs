//! Content checksums recorded in the migration ledger

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a migration file's contents.
pub fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
