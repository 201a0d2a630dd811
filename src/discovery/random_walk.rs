//! RandomWalkExplorer — parallel iterative lookups against random target
//! IDs to diversify the discovered peer set (spec §2 item 5).
//!
//! Grounded in `original_source/discovery/random_walk.py`'s
//! `RandomWalkExplorer.explore_network`/`_single_random_walk`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::types::{NodeId, NodeInfo};

use super::node_discovery::NodeDiscoveryService;

pub struct RandomWalkExplorer {
    discovery: Arc<NodeDiscoveryService>,
    explored_regions: Mutex<HashSet<u32>>,
}

#[derive(Debug, Default, Clone)]
pub struct RandomWalkResult {
    pub discovered_nodes: Vec<NodeInfo>,
    pub walks_completed: usize,
    pub duration: std::time::Duration,
}

impl RandomWalkExplorer {
    pub fn new(discovery: Arc<NodeDiscoveryService>) -> Self {
        Self {
            discovery,
            explored_regions: Mutex::new(HashSet::new()),
        }
    }

    /// Run `walk_count` independent random-target lookups in parallel, each
    /// looking for up to `k_per_walk` nodes, and return the de-duplicated
    /// union.
    pub async fn explore_network(&self, walk_count: usize, k_per_walk: usize) -> RandomWalkResult {
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..walk_count {
            let discovery = self.discovery.clone();
            let target = NodeId::random();
            self.record_region(&target);
            handles.push(tokio::spawn(async move {
                discovery.iterative_find_node(target, k_per_walk, None).await
            }));
        }

        let mut discovered: HashMap<NodeId, NodeInfo> = HashMap::new();
        let mut walks_completed = 0;
        for handle in handles {
            if let Ok(result) = handle.await {
                walks_completed += 1;
                for node in result.discovered_nodes {
                    discovered.entry(node.id).or_insert(node);
                }
            }
        }

        RandomWalkResult {
            discovered_nodes: discovered.into_values().collect(),
            walks_completed,
            duration: start.elapsed(),
        }
    }

    /// Record the first 32 bits of a target ID as an "explored region" —
    /// a diagnostic of ID-space coverage, not used for correctness (spec §4.5).
    pub fn record_region(&self, target: &NodeId) {
        let bytes = target.as_bytes();
        let region = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.explored_regions.lock().insert(region);
    }

    /// `|regions| / 2^32`, clipped to 1.0 (spec §4.5).
    pub fn coverage_fraction(&self) -> f64 {
        (self.explored_regions.lock().len() as f64 / 2f64.powi(32)).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dht::transport::InMemoryNetwork;
    use crate::dht::DhtNode;
    use crate::types::RoleKind;

    async fn test_node(addr: &str) -> DhtNode {
        let network = InMemoryNetwork::new();
        let socket_addr: std::net::SocketAddr = addr.parse().unwrap();
        let transport = Arc::new(network.register(socket_addr));
        DhtNode::start(
            transport,
            NodeId::random(),
            RoleKind::ALL.into_iter().collect(),
            Arc::new(Config::default()),
        )
        .await
    }

    #[tokio::test]
    async fn coverage_fraction_grows_with_distinct_regions() {
        let node = test_node("127.0.0.1:42001").await;
        let discovery = Arc::new(NodeDiscoveryService::new(node, Arc::new(Config::default())));
        let explorer = RandomWalkExplorer::new(discovery);
        assert_eq!(explorer.coverage_fraction(), 0.0);
        explorer.record_region(&NodeId::zero());
        assert!(explorer.coverage_fraction() > 0.0);
    }

    #[tokio::test]
    async fn explore_network_deduplicates_across_walks() {
        let node = test_node("127.0.0.1:42002").await;
        let discovery = Arc::new(NodeDiscoveryService::new(node, Arc::new(Config::default())));
        let explorer = RandomWalkExplorer::new(discovery);
        let result = explorer.explore_network(3, 5).await;
        assert_eq!(result.walks_completed, 3);
    }
}
