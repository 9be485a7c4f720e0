//! Content hashing.

use alloy_primitives::{keccak256, B256};

/// Keccak-256 over raw bytes.
pub fn hash(data: &[u8]) -> B256 {
    keccak256(data)
}

/// True iff `expected` is the hash of `data`.
pub fn match_hash(data: &[u8], expected: &B256) -> bool {
    hash(data) == *expected
}
