//! Consistent hashing primitives for the ring
//!
//! - SHA-256 digest reduced modulo the ring space for keys and node names
//! - Half-open circular interval tests `(from, to]` with wraparound

use sha2::{Digest, Sha256};

/// Position on the ring, in `[0, 2^m)`.
pub type NodeId = u64;

/// Largest supported `m`.
pub const MAX_HASH_BITS: u32 = 32;

/// Size of the ring space for `hash_bits` bits.
pub fn ring_space(hash_bits: u32) -> u64 {
    1u64 << hash_bits
}

/// Hash a key (or node name) onto a ring of `space` positions.
///
/// The full digest is read as one big-endian unsigned integer and reduced
/// modulo `space`, so the result is stable across processes.
pub fn hash_key(key: &str, space: u64) -> NodeId {
    assert!(space > 0, "ring space must be non-empty");
    let digest = Sha256::digest(key.as_bytes());
    let space = space as u128;
    digest
        .iter()
        .fold(0u128, |acc, byte| (acc * 256 + *byte as u128) % space) as NodeId
}

/// Is `id` inside the arc `(from, to]`?
///
/// When `from > to` the arc wraps past the top of the space back to zero.
/// When `from == to` the arc covers the whole ring (single-member ring).
pub fn is_between(id: NodeId, from: NodeId, to: NodeId) -> bool {
    if from < to {
        id > from && id <= to
    } else if from > to {
        id > from || id <= to
    } else {
        true
    }
}
