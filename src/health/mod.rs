//! HealthCheckManager — three-tier periodic peer verifier (spec §4.3).
//!
//! Grounded in `original_source/discovery/health_check_manager.py`'s
//! `HealthCheckLevel`/`NodeHealthStatus`/`HealthCheckManager` (tier
//! definitions, target-set rules, `needs_removal` criterion), restructured
//! onto [`crate::dht::DhtNode`] for the actual ping/find_node probes and
//! [`crate::cache::NodeCache`] for eviction, the way the teacher's
//! `lib-network` components take their collaborators by constructor
//! injection rather than import-time globals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::NodeCache;
use crate::config::Config;
use crate::dht::DhtNode;
use crate::types::{now_unix, NodeId, NodeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthCheckLevel {
    Fast,
    Medium,
    Deep,
}

#[derive(Debug, Clone)]
pub struct NodeHealthStatus {
    pub node_id: NodeId,
    pub consecutive_failures: u32,
    pub last_success: Option<u64>,
    pub last_failure: Option<u64>,
    pub last_check: Option<u64>,
    pub last_level: HealthCheckLevel,
    pub availability_score: f64,
    pub is_critical: bool,
    pub total_checks: u64,
    pub successful_checks: u64,
}

impl NodeHealthStatus {
    fn new(node_id: NodeId, is_critical: bool) -> Self {
        Self {
            node_id,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
            last_check: None,
            last_level: HealthCheckLevel::Fast,
            availability_score: 1.0,
            is_critical,
            total_checks: 0,
            successful_checks: 0,
        }
    }

    fn update_success(&mut self, level: HealthCheckLevel) {
        let now = now_unix();
        self.consecutive_failures = 0;
        self.last_success = Some(now);
        self.last_check = Some(now);
        self.last_level = level;
        self.total_checks += 1;
        self.successful_checks += 1;
        self.recompute_score();
    }

    fn update_failure(&mut self, level: HealthCheckLevel) {
        let now = now_unix();
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        self.last_check = Some(now);
        self.last_level = level;
        self.total_checks += 1;
        self.recompute_score();
    }

    fn recompute_score(&mut self) {
        if self.total_checks > 0 {
            self.availability_score = self.successful_checks as f64 / self.total_checks as f64;
        }
    }

    /// Eviction criterion: `consecutive_failures ≥ F ∨ availability_score < S_min`.
    pub fn needs_removal(&self, failure_threshold: u32, min_score: f64) -> bool {
        self.consecutive_failures >= failure_threshold || self.availability_score < min_score
    }
}

/// Hierarchical, batched peer verifier. One instance per node; drives the
/// node's own [`NodeCache`] and [`crate::dht::DhtNode`] routing table.
pub struct HealthCheckManager {
    node: DhtNode,
    cache: Arc<NodeCache>,
    config: Arc<Config>,
    status: Mutex<HashMap<NodeId, NodeHealthStatus>>,
}

impl HealthCheckManager {
    pub fn new(node: DhtNode, cache: Arc<NodeCache>, config: Arc<Config>) -> Self {
        Self {
            node,
            cache,
            config,
            status: Mutex::new(HashMap::new()),
        }
    }

    pub fn status_of(&self, id: &NodeId) -> Option<NodeHealthStatus> {
        self.status.lock().get(id).cloned()
    }

    /// The target set for `level`, per spec §4.3's per-tier rules.
    fn target_set(&self, level: HealthCheckLevel) -> Vec<NodeId> {
        let snapshot = self.cache.snapshot();
        let status = self.status.lock();

        match level {
            HealthCheckLevel::Fast => snapshot
                .iter()
                .filter(|c| c.node_info.state == NodeState::Active)
                .map(|c| c.node_info.id)
                .collect(),
            HealthCheckLevel::Medium => snapshot
                .iter()
                .filter(|c| {
                    c.availability_score < 0.7
                        || now_unix().saturating_sub(c.last_verified) > 600
                })
                .map(|c| c.node_info.id)
                .collect(),
            HealthCheckLevel::Deep => snapshot
                .iter()
                .filter(|c| {
                    c.node_info.capabilities.iter().any(|r| r.is_critical())
                        || status
                            .get(&c.node_info.id)
                            .map(|s| s.consecutive_failures > 0)
                            .unwrap_or(false)
                        || c.availability_score < 0.5
                })
                .map(|c| c.node_info.id)
                .collect(),
        }
    }

    fn timeout_for(&self, level: HealthCheckLevel) -> Duration {
        match level {
            HealthCheckLevel::Fast => Duration::from_secs_f64(self.config.health_check_fast_timeout),
            HealthCheckLevel::Medium => Duration::from_secs_f64(self.config.health_check_medium_timeout),
            HealthCheckLevel::Deep => Duration::from_secs_f64(self.config.health_check_deep_timeout),
        }
    }

    /// Run one pass of `level` over its target set, batched B-wide with up
    /// to C batches concurrently (both adaptive — spec §4.3's table): a
    /// semaphore of C permits gates how many batches execute at once, and
    /// within each batch all (up to B) node probes run in parallel.
    pub async fn run_level(&self, level: HealthCheckLevel, network_size: usize) -> usize {
        let targets = self.target_set(level);
        if targets.is_empty() {
            return 0;
        }

        let params = self.config.health_check_params(network_size);
        let timeout = self.timeout_for(level);
        let batch_semaphore = Arc::new(tokio::sync::Semaphore::new(params.concurrent_batches.max(1)));

        let mut batch_handles = Vec::new();
        for chunk in targets.chunks(params.batch_size.max(1)) {
            let chunk = chunk.to_vec();
            let batch_semaphore = batch_semaphore.clone();
            let node = self.node.clone();
            batch_handles.push(tokio::spawn(async move {
                let _permit = batch_semaphore.acquire_owned().await.unwrap();
                let mut probe_handles = Vec::with_capacity(chunk.len());
                for id in chunk {
                    let node = node.clone();
                    probe_handles.push(tokio::spawn(async move {
                        let ok = Self::probe(&node, id, level, timeout).await;
                        (id, ok)
                    }));
                }
                let mut results = Vec::with_capacity(probe_handles.len());
                for handle in probe_handles {
                    if let Ok(pair) = handle.await {
                        results.push(pair);
                    }
                }
                results
            }));
        }

        let mut processed = 0;
        for handle in batch_handles {
            if let Ok(results) = handle.await {
                for (id, ok) in results {
                    self.record_result(id, level, ok);
                    processed += 1;
                }
            }
        }

        self.evict_unhealthy();
        processed
    }

    async fn probe(node: &DhtNode, id: NodeId, level: HealthCheckLevel, timeout: Duration) -> bool {
        let contact = node.known_contacts().into_iter().find(|c| c.id == id);
        let Some(contact) = contact else { return false };
        let Ok(addr) = contact.socket_addr().parse() else { return false };

        let ping_ok = tokio::time::timeout(timeout, node.ping(addr)).await.map(|r| r.is_ok()).unwrap_or(false);
        if !ping_ok || level == HealthCheckLevel::Fast {
            return ping_ok;
        }

        let find_ok = tokio::time::timeout(timeout, node.find_node(id)).await.map(|r| r.is_ok()).unwrap_or(false);
        if level == HealthCheckLevel::Medium {
            return find_ok;
        }

        // DEEP: also require the contact still advertises a non-empty
        // capability set (role/capability verification, spec §4.3).
        find_ok && !contact.capabilities.is_empty()
    }

    fn record_result(&self, id: NodeId, level: HealthCheckLevel, ok: bool) {
        let is_critical = self
            .node
            .known_contacts()
            .into_iter()
            .find(|c| c.id == id)
            .map(|c| c.capabilities.iter().any(|r| r.is_critical()))
            .unwrap_or(false);

        let mut status = self.status.lock();
        let entry = status.entry(id).or_insert_with(|| NodeHealthStatus::new(id, is_critical));
        if ok {
            entry.update_success(level);
            self.cache.update_verification(&id, true);
        } else {
            entry.update_failure(level);
            self.cache.update_verification(&id, false);
        }
    }

    /// Eviction policy: nodes meeting the removal criterion come out of the
    /// cache, the routing table, and the health status map. Routing-table
    /// removal failure is logged but non-fatal (spec §4.3).
    fn evict_unhealthy(&self) {
        let failure_threshold = self.config.health_check_failure_threshold;
        let min_score = self.config.health_check_min_availability_score;

        let to_evict: Vec<NodeId> = {
            let status = self.status.lock();
            status
                .values()
                .filter(|s| s.needs_removal(failure_threshold, min_score))
                .map(|s| s.node_id)
                .collect()
        };

        for id in to_evict {
            self.cache.remove(&id);
            self.node.remove_contact(&id);
            self.status.lock().remove(&id);
            tracing::info!(node_id = %id, "evicted unhealthy node");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_removal_trips_on_failure_threshold() {
        let mut status = NodeHealthStatus::new(NodeId::random(), false);
        status.update_failure(HealthCheckLevel::Fast);
        status.update_failure(HealthCheckLevel::Fast);
        status.update_failure(HealthCheckLevel::Fast);
        assert!(status.needs_removal(3, 0.3));
        assert!(!status.needs_removal(4, 0.3));
    }

    #[test]
    fn needs_removal_trips_on_low_availability_score() {
        let mut status = NodeHealthStatus::new(NodeId::random(), false);
        status.update_success(HealthCheckLevel::Fast);
        status.update_failure(HealthCheckLevel::Fast);
        status.update_failure(HealthCheckLevel::Fast);
        status.update_failure(HealthCheckLevel::Fast);
        // 1/4 = 0.25 < default min 0.3
        assert!(status.needs_removal(100, 0.3));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mut status = NodeHealthStatus::new(NodeId::random(), false);
        status.update_failure(HealthCheckLevel::Fast);
        status.update_failure(HealthCheckLevel::Fast);
        status.update_success(HealthCheckLevel::Fast);
        assert_eq!(status.consecutive_failures, 0);
    }
}
