//! Kademlia routing table: k-buckets keyed by XOR-distance bucket index.
//!
//! Generalizes the teacher's `KademliaRouter` (`lib-storage/src/dht/routing.rs`)
//! from its 256-bucket/peer-registry design down to the spec's 160-bucket
//! scheme, dropping the NodeId-ownership challenge-response machinery (out
//! of scope here — no signature layer in front of this DHT).

use std::collections::HashMap;

use crate::config::Config;
use crate::types::{NodeId, NodeInfo, RoleKind, MAX_BUCKET_INDEX};

/// One k-bucket: an insertion-ordered list of known contacts, capped at `k`.
#[derive(Debug, Default, Clone)]
struct Bucket {
    contacts: Vec<NodeInfo>,
}

/// Kademlia routing table for a single local node.
#[derive(Debug)]
pub struct KademliaRouter {
    local_id: NodeId,
    k: usize,
    buckets: HashMap<usize, Bucket>,
}

impl KademliaRouter {
    pub fn new(local_id: NodeId, k: usize) -> Self {
        Self {
            local_id,
            k,
            buckets: HashMap::new(),
        }
    }

    pub fn from_config(local_id: NodeId, config: &Config) -> Self {
        Self::new(local_id, config.dht_ksize)
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    fn bucket_index(&self, id: &NodeId) -> usize {
        self.local_id.bucket_index(id)
    }

    /// Insert or refresh a contact. A bucket at capacity evicts its
    /// least-recently-seen entry (the teacher's failed-attempts eviction
    /// doesn't apply here — health tracking lives in [`crate::health`]).
    pub fn add_contact(&mut self, info: NodeInfo) {
        if info.id == self.local_id {
            return;
        }
        let index = self.bucket_index(&info.id);
        let bucket = self.buckets.entry(index).or_default();

        if let Some(existing) = bucket.contacts.iter_mut().find(|c| c.id == info.id) {
            *existing = info;
            return;
        }

        if bucket.contacts.len() >= self.k {
            bucket.contacts.remove(0);
        }
        bucket.contacts.push(info);
    }

    pub fn remove_contact(&mut self, id: &NodeId) {
        let index = self.bucket_index(id);
        if let Some(bucket) = self.buckets.get_mut(&index) {
            bucket.contacts.retain(|c| c.id != *id);
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        let index = self.bucket_index(id);
        self.buckets
            .get(&index)
            .map(|b| b.contacts.iter().any(|c| c.id == *id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.contacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_contacts(&self) -> Vec<NodeInfo> {
        self.buckets
            .values()
            .flat_map(|b| b.contacts.iter().cloned())
            .collect()
    }

    pub fn bucket_contacts(&self, index: usize) -> Vec<NodeInfo> {
        self.buckets
            .get(&index)
            .map(|b| b.contacts.clone())
            .unwrap_or_default()
    }

    /// Top `count` known contacts ordered by ascending XOR distance to
    /// `target` (spec §4.4 step 1's "local enumeration" fallback).
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<NodeInfo> {
        let mut all = self.all_contacts();
        all.sort_by_key(|c| target.distance_key(&c.id));
        all.truncate(count);
        all
    }

    /// Contacts able to take on `role`, closest-first.
    pub fn find_closest_with_capability(
        &self,
        target: &NodeId,
        count: usize,
        role: RoleKind,
    ) -> Vec<NodeInfo> {
        let mut matching: Vec<NodeInfo> = self
            .all_contacts()
            .into_iter()
            .filter(|c| c.capabilities.contains(&role))
            .collect();
        matching.sort_by_key(|c| target.distance_key(&c.id));
        matching.truncate(count);
        matching
    }

    fn bucket_counts(&self) -> Vec<usize> {
        (0..=MAX_BUCKET_INDEX)
            .map(|i| self.buckets.get(&i).map(|b| b.contacts.len()).unwrap_or(0))
            .collect()
    }

    /// Routing-table health summary, per spec §4.1.
    pub fn info(&self) -> RoutingTableInfo {
        let counts = self.bucket_counts();
        let total_nodes = counts.iter().sum();
        let active_buckets = counts.iter().filter(|&&c| c > 0).count();
        let max_count = counts.iter().copied().max().unwrap_or(0);

        let single_bucket_overload = (max_count as f64) > 0.8 * self.k as f64;

        let distribution_score = if max_count == 0 {
            1.0
        } else {
            let mean = total_nodes as f64 / counts.len() as f64;
            let variance = counts
                .iter()
                .map(|&c| {
                    let d = c as f64 - mean;
                    d * d
                })
                .sum::<f64>()
                / counts.len() as f64;
            (1.0 - variance / (max_count as f64 * max_count as f64)).clamp(0.0, 1.0)
        };

        let well_distributed =
            active_buckets >= 3 && !single_bucket_overload && distribution_score > 0.5;

        RoutingTableInfo {
            total_nodes,
            active_buckets,
            bucket_counts: counts,
            single_bucket_overload,
            distribution_score,
            well_distributed,
        }
    }
}

/// `routing_table_info()`'s return shape (spec §4.1).
#[derive(Debug, Clone)]
pub struct RoutingTableInfo {
    pub total_nodes: usize,
    pub active_buckets: usize,
    pub bucket_counts: Vec<usize>,
    pub single_bucket_overload: bool,
    pub distribution_score: f64,
    pub well_distributed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: NodeId) -> NodeInfo {
        NodeInfo::new(id, "127.0.0.1", 7000)
    }

    #[test]
    fn local_node_is_never_added() {
        let local = NodeId::random();
        let mut router = KademliaRouter::new(local, 20);
        router.add_contact(contact(local));
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn bucket_at_capacity_evicts_oldest() {
        let local = NodeId::zero();
        let mut router = KademliaRouter::new(local, 2);

        for i in 1..=3u8 {
            let mut bytes = [0u8; 20];
            bytes[19] = i;
            router.add_contact(contact(NodeId(bytes)));
        }

        // All three share bucket index 0 (differ only in the low byte's low bits).
        assert!(router.len() <= 2);
    }

    #[test]
    fn find_closest_orders_by_distance_to_target() {
        let local = NodeId::zero();
        let mut router = KademliaRouter::new(local, 20);

        let near = {
            let mut b = [0u8; 20];
            b[19] = 0x01;
            NodeId(b)
        };
        let far = {
            let mut b = [0u8; 20];
            b[0] = 0xFF;
            NodeId(b)
        };
        router.add_contact(contact(near));
        router.add_contact(contact(far));

        let target = NodeId::zero();
        let ordered = router.find_closest(&target, 2);
        assert_eq!(ordered[0].id, near);
        assert_eq!(ordered[1].id, far);
    }

    #[test]
    fn empty_table_is_well_distributed_by_vacuous_truth_only_when_populated() {
        let router = KademliaRouter::new(NodeId::random(), 20);
        let info = router.info();
        assert_eq!(info.total_nodes, 0);
        assert!(!info.well_distributed);
    }

    #[test]
    fn single_bucket_overload_trips_above_eighty_percent_of_k() {
        let local = NodeId::zero();
        let mut router = KademliaRouter::new(local, 4);
        // Push 4 contacts into the same bucket (bucket index differs only
        // in low bits so they all land far from local in bucket ~ index 0..7).
        for i in 1..=4u8 {
            let mut bytes = [0u8; 20];
            bytes[19] = i;
            router.add_contact(contact(NodeId(bytes)));
        }
        let info = router.info();
        assert!(info.single_bucket_overload);
    }
}
