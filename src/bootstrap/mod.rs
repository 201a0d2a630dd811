//! BootstrapManager — maintains the pool of seed nodes (spec §2 item 7).
//!
//! Grounded in `original_source/discovery/bootstrap_manager.py`'s
//! `BootstrapManager`: the four selection strategies, the
//! round-robin cursor, and the unhealthy-after-3-failures rule, restyled
//! with `Config::bootstrap_scale` (ported from the same source's
//! `SCALING_CONFIG`/`_determine_scale`) instead of a module-level dict.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::config::{Config, NetworkScale};
use crate::types::now_unix;

#[derive(Debug, Clone)]
pub struct BootstrapNode {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub priority: u32,
    pub load_score: f64,
    pub last_health_check: u64,
    pub is_healthy: bool,
    pub connection_count: u32,
    pub failure_count: u32,
}

impl BootstrapNode {
    fn new(host: impl Into<String>, port: u16, priority: u32) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            port,
            priority,
            load_score: 0.0,
            last_health_check: 0,
            is_healthy: true,
            connection_count: 0,
            failure_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    RoundRobin,
    LeastLoaded,
    Priority,
    Random,
}

impl SelectionStrategy {
    pub fn parse(s: &str) -> Self {
        match s {
            "least_loaded" => Self::LeastLoaded,
            "priority" => Self::Priority,
            "random" => Self::Random,
            _ => Self::RoundRobin,
        }
    }
}

struct State {
    nodes: HashMap<(String, u16), BootstrapNode>,
    round_robin_index: usize,
}

/// Seed-node pool with health tracking and pluggable selection strategy.
pub struct BootstrapManager {
    worker_count: usize,
    scale: NetworkScale,
    state: Mutex<State>,
}

impl BootstrapManager {
    /// Build the pool from `candidates`, scaled down to the number this
    /// network size warrants (spec §4.7 / source's `SCALING_CONFIG`).
    pub fn new(candidates: &[(String, u16)], worker_count: usize, config: &Config) -> Self {
        let (scale, max_nodes) = config.bootstrap_scale(worker_count);

        let mut nodes = HashMap::new();
        for (priority, (host, port)) in candidates.iter().take(max_nodes).enumerate() {
            nodes.insert((host.clone(), *port), BootstrapNode::new(host.clone(), *port, priority as u32 + 1));
        }

        Self {
            worker_count,
            scale,
            state: Mutex::new(State { nodes, round_robin_index: 0 }),
        }
    }

    pub fn scale(&self) -> NetworkScale {
        self.scale
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn healthy_count(&self) -> usize {
        self.state.lock().nodes.values().filter(|n| n.is_healthy).count()
    }

    pub fn total_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Select up to `count` bootstrap nodes using `strategy`. Falls back to
    /// the full node set if none are currently healthy.
    pub fn get_bootstrap_nodes(&self, count: Option<usize>, strategy: SelectionStrategy) -> Vec<(String, u16)> {
        let mut state = self.state.lock();

        let mut healthy: Vec<BootstrapNode> = state.nodes.values().filter(|n| n.is_healthy).cloned().collect();
        if healthy.is_empty() {
            healthy = state.nodes.values().cloned().collect();
        }
        if healthy.is_empty() {
            return Vec::new();
        }

        let count = count.unwrap_or(healthy.len());
        let selected = match strategy {
            SelectionStrategy::RoundRobin => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    let idx = state.round_robin_index % healthy.len();
                    out.push(healthy[idx].clone());
                    state.round_robin_index = state.round_robin_index.wrapping_add(1);
                }
                out
            }
            SelectionStrategy::LeastLoaded => {
                healthy.sort_by(|a, b| {
                    (a.load_score, a.connection_count)
                        .partial_cmp(&(b.load_score, b.connection_count))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                healthy.into_iter().take(count).collect()
            }
            SelectionStrategy::Priority => {
                healthy.sort_by_key(|n| n.priority);
                healthy.into_iter().take(count).collect()
            }
            SelectionStrategy::Random => {
                let mut rng = rand::thread_rng();
                healthy.shuffle(&mut rng);
                healthy.into_iter().take(count).collect()
            }
        };

        selected.into_iter().map(|n| (n.host, n.port)).collect()
    }

    pub fn update_node_load(&self, host: &str, port: u16, load_score: Option<f64>, connection_count: Option<u32>) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(&(host.to_string(), port)) {
            if let Some(score) = load_score {
                node.load_score = score.clamp(0.0, 1.0);
            }
            if let Some(count) = connection_count {
                node.connection_count = count;
            }
        }
    }

    pub fn report_connection_success(&self, host: &str, port: u16) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(&(host.to_string(), port)) {
            node.connection_count += 1;
            node.failure_count = 0;
            node.is_healthy = true;
            node.last_health_check = now_unix();
        }
    }

    /// Marks the node unhealthy after the third consecutive failure
    /// (spec/source: `failure_count >= 3`).
    pub fn report_connection_failure(&self, host: &str, port: u16) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(&(host.to_string(), port)) {
            node.failure_count += 1;
            if node.failure_count >= 3 {
                node.is_healthy = false;
                tracing::warn!(%host, port, failures = node.failure_count, "bootstrap node marked unhealthy");
            }
        }
    }

    pub fn snapshot(&self) -> Vec<BootstrapNode> {
        self.state.lock().nodes.values().cloned().collect()
    }
}

pub type SharedBootstrapManager = Arc<BootstrapManager>;

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(n: usize) -> Vec<(String, u16)> {
        (0..n).map(|i| (format!("seed{i}"), 5678 + i as u16)).collect()
    }

    #[test]
    fn pool_is_capped_to_scale_max_nodes() {
        let config = Config::default();
        let manager = BootstrapManager::new(&candidates(10), 5, &config);
        assert_eq!(manager.total_count(), config.bootstrap_small_nodes);
    }

    #[test]
    fn round_robin_cycles_through_all_nodes() {
        let config = Config::default();
        let manager = BootstrapManager::new(&candidates(3), 5, &config);
        let first = manager.get_bootstrap_nodes(Some(1), SelectionStrategy::RoundRobin);
        let second = manager.get_bootstrap_nodes(Some(1), SelectionStrategy::RoundRobin);
        assert_ne!(first, second);
    }

    #[test]
    fn node_becomes_unhealthy_after_three_failures() {
        let config = Config::default();
        let manager = BootstrapManager::new(&candidates(1), 5, &config);
        let (host, port) = candidates(1)[0].clone();
        for _ in 0..3 {
            manager.report_connection_failure(&host, port);
        }
        assert_eq!(manager.healthy_count(), 0);
    }

    #[test]
    fn success_report_clears_failure_count_and_restores_health() {
        let config = Config::default();
        let manager = BootstrapManager::new(&candidates(1), 5, &config);
        let (host, port) = candidates(1)[0].clone();
        manager.report_connection_failure(&host, port);
        manager.report_connection_failure(&host, port);
        manager.report_connection_success(&host, port);
        assert_eq!(manager.healthy_count(), 1);
    }

    #[test]
    fn priority_selection_orders_by_ascending_priority() {
        let config = Config::default();
        let manager = BootstrapManager::new(&candidates(3), 5, &config);
        let selected = manager.get_bootstrap_nodes(Some(3), SelectionStrategy::Priority);
        assert_eq!(selected[0].0, "seed0");
    }
}
