//! Double-SHA256 and binary merkle root construction.
//!
//! The coinbase transaction and the template's transaction hashes are folded
//! into the header's merkle root by iterative pairwise hashing. Odd levels
//! pair the last element with itself (the duplicate-last rule).

use sha2::{Digest, Sha256};

/// Double-SHA256 digest.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Merkle root over the given leaves.
///
/// A single leaf is its own root. The caller always supplies at least the
/// coinbase hash; an empty slice yields the zero root.
pub fn fast_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&left);
            buf[32..].copy_from_slice(&right);
            next.push(sha256d(&buf));
        }
        level = next;
    }
    level[0]
}
