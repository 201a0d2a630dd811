//! SmartDiscoveryStrategy — composes cache → iterative discovery → random
//! walk → aggressive fallback behind one call, with deadline tracking
//! (spec §2 item 6).
//!
//! Grounded in `original_source/discovery/discovery_strategies.py`'s
//! `SmartDiscoveryStrategy.discover_nodes` (the four-stage funnel and its
//! `discovery_deadline` extension-on-shortfall behavior).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::NodeCache;
use crate::config::Config;
use crate::dht::DhtNode;
use crate::error::{CqkdError, Result};
use crate::types::{NodeId, NodeInfo, RoleKind};

use super::node_discovery::NodeDiscoveryService;
use super::random_walk::RandomWalkExplorer;

pub struct SmartDiscoveryStrategy {
    node: DhtNode,
    config: Arc<Config>,
    cache: Arc<NodeCache>,
    discovery: Arc<NodeDiscoveryService>,
    random_walk: Arc<RandomWalkExplorer>,
}

#[derive(Debug, Default, Clone)]
pub struct DiscoveryReport {
    pub discovered_nodes: Vec<NodeInfo>,
    pub strategies_used: Vec<&'static str>,
    pub duration: Duration,
}

impl SmartDiscoveryStrategy {
    pub fn new(node: DhtNode, config: Arc<Config>) -> Self {
        let cache = Arc::new(NodeCache::default());
        let discovery = Arc::new(NodeDiscoveryService::new(node.clone(), config.clone()));
        let random_walk = Arc::new(RandomWalkExplorer::new(discovery.clone()));
        Self { node, config, cache, discovery, random_walk }
    }

    pub fn cache(&self) -> &Arc<NodeCache> {
        &self.cache
    }

    /// Cache → discovery → random walk → aggressive-retry, honoring an
    /// overall deadline that's extended once, up front, if the routing
    /// table already looks too small or poorly distributed to satisfy the
    /// request (spec §4.6 step 1).
    pub async fn discover_nodes(
        &self,
        required_count: usize,
        required_capabilities: &[RoleKind],
        prefer_distributed: bool,
    ) -> Result<DiscoveryReport> {
        let start = Instant::now();
        let mut discovered: HashMap<NodeId, NodeInfo> = HashMap::new();
        let mut strategies_used = Vec::new();

        let overall = Duration::from_secs(self.config.max_discovery_time);
        let mut deadline = start + overall;

        // Step 1: analyse routing-table health before doing anything else;
        // extend the deadline if the table can't plausibly satisfy the
        // request on its own.
        let table_info = self.node.routing_table_info();
        if table_info.total_nodes < required_count || !table_info.well_distributed {
            let extension = Duration::from_secs_f64(self.config.base_query_timeout * 3.0).min(overall / 2);
            deadline += extension;
        }

        // Step 2: cache.
        let cached = if required_capabilities.is_empty() {
            self.cache.snapshot().into_iter().map(|c| c.node_info).collect::<Vec<_>>()
        } else {
            self.cache.get_by_capabilities(required_capabilities, required_count, self.config.health_check_min_availability_score)
        };
        if !cached.is_empty() {
            strategies_used.push("cache");
            for node in cached {
                discovered.insert(node.id, node);
            }
        }

        // Step 3: standard iterative discovery for 2·remaining, per-call
        // timeout capped at 60% of whatever's left of the deadline.
        if discovered.len() < required_count && Instant::now() < deadline {
            strategies_used.push("standard_discovery");
            let remaining = required_count - discovered.len();
            let budget = deadline.saturating_duration_since(Instant::now());
            let result = self
                .discovery
                .discover_nodes_for_roles(remaining, required_capabilities, &self.cache, Some(budget.mul_f64(0.6)))
                .await;
            for node in result.discovered_nodes {
                discovered.insert(node.id, node);
            }
        }

        // Step 4: random walk, only if the caller wants a diversified set.
        if discovered.len() < required_count && prefer_distributed && Instant::now() < deadline {
            strategies_used.push("random_walk");
            let result = self.random_walk.explore_network(5, required_count).await;
            for node in result.discovered_nodes {
                self.cache.add(node.clone());
                discovered.insert(node.id, node);
            }
        }

        // Step 5: one more Node Discovery pass for 3·remaining, no
        // capability filter, capped at min(query_timeout·3, query_timeout_max).
        if discovered.len() < required_count && Instant::now() < deadline {
            strategies_used.push("aggressive_fallback");
            let remaining = required_count - discovered.len();
            let timeout = Duration::from_secs_f64(self.config.base_query_timeout * 3.0)
                .min(Duration::from_secs_f64(self.config.max_query_timeout));
            let result = self
                .discovery
                .iterative_find_node(self.node.local_id(), remaining * 3, Some(timeout))
                .await;
            for node in result.discovered_nodes {
                self.cache.add(node.clone());
                discovered.insert(node.id, node);
            }
        }

        if discovered.len() < required_count {
            return Err(CqkdError::NotEnoughNodes {
                found: discovered.len(),
                required: required_count,
            });
        }

        Ok(DiscoveryReport {
            discovered_nodes: discovered.into_values().collect(),
            strategies_used,
            duration: start.elapsed(),
        })
    }

    /// Background refresh: re-verify cached nodes whose `last_verified` is
    /// stale (spec §4.2's `needs_refresh`).
    pub async fn refresh_stale_entries(&self) {
        let now = crate::types::now_unix();
        let stale: Vec<NodeId> = self
            .cache
            .snapshot()
            .into_iter()
            .filter(|c| c.needs_refresh(now))
            .map(|c| c.node_info.id)
            .collect();

        for id in stale {
            let contact = self.node.known_contacts().into_iter().find(|c| c.id == id);
            let Some(contact) = contact else { continue };
            let Ok(addr) = contact.socket_addr().parse() else { continue };
            let ok = self.node.ping(addr).await.is_ok();
            self.cache.update_verification(&id, ok);
        }
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cache.cleanup_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::transport::InMemoryNetwork;

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
    async fn returns_not_enough_nodes_when_swarm_is_empty() {
        let node = test_node("127.0.0.1:43001").await;
        let strategy = SmartDiscoveryStrategy::new(node, Arc::new(Config::default()));
        let result = strategy.discover_nodes(5, &[], false).await;
        assert!(matches!(result, Err(CqkdError::NotEnoughNodes { .. })));
    }

    #[tokio::test]
    async fn cache_hit_satisfies_request_without_further_strategies() {
        let node = test_node("127.0.0.1:43002").await;
        let strategy = SmartDiscoveryStrategy::new(node, Arc::new(Config::default()));
        for _ in 0..3 {
            let mut info = NodeInfo::new(NodeId::random(), "127.0.0.1", 9000);
            info.state = crate::types::NodeState::Active;
            strategy.cache().add(info);
        }
        let report = strategy.discover_nodes(3, &[], false).await.unwrap();
        assert_eq!(report.strategies_used, vec!["cache"]);
        assert!(report.discovered_nodes.len() >= 3);
    }
}
