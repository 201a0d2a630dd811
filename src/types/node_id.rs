//! 160-bit NodeID: XOR distance and Kademlia bucket index.
//!
//! Generalizes the teacher's `KademliaRouter::calculate_distance` /
//! `get_bucket_index` (`lib-storage/src/dht/routing.rs`) from that crate's
//! 32-byte/256-bucket identifiers down to the spec's 160-bit/160-bucket
//! scheme.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of k-buckets for a 160-bit identifier space.
pub const MAX_BUCKET_INDEX: usize = 159;

/// Opaque 160-bit node identifier. Immutable for the node's lifetime,
/// derived randomly at boot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    /// Derive a fresh NodeId from OS entropy.
    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance to another NodeId, as a big-endian 160-bit value
    /// represented by its own 20-byte array.
    pub fn xor(&self, other: &NodeId) -> [u8; 20] {
        let mut out = [0u8; 20];
        for i in 0..20 {
            out[i] = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Kademlia bucket index: the position of the highest set bit in the
    /// XOR distance, counted from the most-significant bit (bucket 0 = far,
    /// bucket 159 = near/identical prefix). Matches the teacher's
    /// `get_bucket_index`, capped at [`MAX_BUCKET_INDEX`].
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let distance = self.xor(other);
        for (byte_index, byte) in distance.iter().enumerate() {
            if *byte != 0 {
                let leading = byte.leading_zeros() as usize;
                let bit_index = byte_index * 8 + leading;
                return MAX_BUCKET_INDEX.saturating_sub(bit_index);
            }
        }
        0 // identical ids
    }

    /// A scalar distance usable for sorting (lower = closer), derived from
    /// the XOR distance bytes, most-significant first.
    pub fn distance_key(&self, other: &NodeId) -> [u8; 20] {
        self.xor(other)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Sort `candidates` ascending by XOR distance to `target`, truncated to
/// `count`. Ties are broken by the candidates' own byte order (a
/// deterministic rule, per spec §8 XOR ordering property).
pub fn k_closest(candidates: &[NodeId], target: &NodeId, count: usize) -> Vec<NodeId> {
    let mut scored: Vec<(NodeId, [u8; 20])> = candidates
        .iter()
        .map(|id| (*id, target.distance_key(id)))
        .collect();
    scored.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0 .0.cmp(&b.0 .0)));
    scored.into_iter().take(count).map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_distance_to_self_is_zero() {
        let id = NodeId::random();
        assert_eq!(id.xor(&id), [0u8; 20]);
        assert_eq!(id.bucket_index(&id), 0);
    }

    #[test]
    fn k_closest_orders_ascending_by_xor_distance() {
        let target = NodeId([0u8; 20]);
        let near = NodeId({
            let mut b = [0u8; 20];
            b[19] = 0x01;
            b
        });
        let far = NodeId({
            let mut b = [0u8; 20];
            b[0] = 0xFF;
            b
        });
        let mid = NodeId({
            let mut b = [0u8; 20];
            b[10] = 0x10;
            b
        });

        let ordered = k_closest(&[far, near, mid], &target, 3);
        assert_eq!(ordered, vec![near, mid, far]);
    }

    #[test]
    fn k_closest_truncates_to_count() {
        let target = NodeId::zero();
        let ids: Vec<NodeId> = (0..10).map(|_| NodeId::random()).collect();
        let top = k_closest(&ids, &target, 3);
        assert_eq!(top.len(), 3);
    }
}
