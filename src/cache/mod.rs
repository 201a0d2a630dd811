//! NodeCache — a bounded TTL cache of known peers with an availability
//! score, indexed by capability and by state (spec §4.2).
//!
//! Shaped after the teacher's `OptimizedDHTCache`
//! (`lib-network/src/dht/cache.rs`): a primary map plus access bookkeeping,
//! `parking_lot::Mutex` for the hot read/write path (precedent: `lib-network`
//! uses `tokio::sync::Mutex` for its async cache; we use the sync flavor
//! since every operation here is non-blocking CPU work). Extended with the
//! capability/state secondary indices and score-based eviction spec §4.2
//! requires, which the teacher's cache — single-value, no peer metadata —
//! doesn't need.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{now_unix, NodeId, NodeInfo, NodeState, RoleKind};

const DEFAULT_MAX_SIZE: usize = 10_000;
const DEFAULT_TTL_SECS: u64 = 600;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct CachedNode {
    pub node_info: NodeInfo,
    pub cached_at: u64,
    pub last_verified: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub availability_score: f64,
}

impl CachedNode {
    fn new(node_info: NodeInfo) -> Self {
        let now = now_unix();
        Self {
            node_info,
            cached_at: now,
            last_verified: now,
            hit_count: 0,
            miss_count: 0,
            availability_score: 1.0,
        }
    }

    fn recompute_score(&mut self) {
        let total = self.hit_count + self.miss_count;
        self.availability_score = if total == 0 {
            1.0
        } else {
            self.hit_count as f64 / total as f64
        };
    }

    fn is_expired(&self, now: u64, ttl_secs: u64) -> bool {
        now.saturating_sub(self.cached_at) > ttl_secs
    }

    pub fn needs_refresh(&self, now: u64) -> bool {
        now.saturating_sub(self.last_verified) > DEFAULT_REFRESH_INTERVAL_SECS
    }
}

struct CacheState {
    nodes: HashMap<NodeId, CachedNode>,
    by_capability: HashMap<RoleKind, HashSet<NodeId>>,
    by_state: HashMap<NodeState, HashSet<NodeId>>,
}

impl CacheState {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            by_capability: HashMap::new(),
            by_state: HashMap::new(),
        }
    }

    fn index(&mut self, id: NodeId, capabilities: &BTreeSet<RoleKind>, state: NodeState) {
        for role in capabilities {
            self.by_capability.entry(*role).or_default().insert(id);
        }
        self.by_state.entry(state).or_default().insert(id);
    }

    fn deindex(&mut self, id: &NodeId, capabilities: &BTreeSet<RoleKind>, state: NodeState) {
        for role in capabilities {
            if let Some(set) = self.by_capability.get_mut(role) {
                set.remove(id);
            }
        }
        if let Some(set) = self.by_state.get_mut(&state) {
            set.remove(id);
        }
    }

    fn remove(&mut self, id: &NodeId) -> Option<CachedNode> {
        let removed = self.nodes.remove(id)?;
        self.deindex(id, &removed.node_info.capabilities, removed.node_info.state);
        Some(removed)
    }
}

/// Bounded TTL cache of known peers (spec §4.2).
pub struct NodeCache {
    state: Mutex<CacheState>,
    max_size: usize,
    ttl_secs: u64,
}

impl NodeCache {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            max_size,
            ttl_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert/refresh an entry. If at capacity, evicts the entry with the
    /// smallest `score·(hits+1)` first (spec §4.2). Returns `false` only if
    /// eviction itself failed (an empty cache can never be full, so this is
    /// effectively infallible — kept `bool`-returning to mirror the source).
    pub fn add(&self, info: NodeInfo) -> bool {
        let mut state = self.state.lock();

        if let Some(existing) = state.nodes.get(&info.id).cloned() {
            state.remove(&info.id);
            let mut refreshed = CachedNode::new(info.clone());
            refreshed.hit_count = existing.hit_count;
            refreshed.miss_count = existing.miss_count;
            refreshed.recompute_score();
            state.index(info.id, &info.capabilities, info.state);
            state.nodes.insert(info.id, refreshed);
            return true;
        }

        if state.nodes.len() >= self.max_size {
            let victim = state
                .nodes
                .iter()
                .min_by(|a, b| {
                    let score_a = a.1.availability_score * (a.1.hit_count as f64 + 1.0);
                    let score_b = b.1.availability_score * (b.1.hit_count as f64 + 1.0);
                    score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(id, _)| *id);

            match victim {
                Some(id) => {
                    state.remove(&id);
                }
                None => return false,
            }
        }

        state.index(info.id, &info.capabilities, info.state);
        state.nodes.insert(info.id, CachedNode::new(info));
        true
    }

    /// Returns `NodeInfo`, or absent; expired entries are removed on access
    /// (and counted as an eviction, not a miss — spec §4.2).
    pub fn get(&self, id: &NodeId) -> Option<NodeInfo> {
        let mut state = self.state.lock();
        let now = now_unix();

        let expired = state.nodes.get(id).map(|c| c.is_expired(now, self.ttl_secs)).unwrap_or(false);
        if expired {
            state.remove(id);
            return None;
        }

        state.nodes.get(id).map(|c| c.node_info.clone())
    }

    /// Intersect the capability index; filter by `score ≥ min_score ∧
    /// state=ACTIVE ∧ not expired`; return the top `count` by score
    /// descending.
    pub fn get_by_capabilities(
        &self,
        required: &[RoleKind],
        count: usize,
        min_score: f64,
    ) -> Vec<NodeInfo> {
        let mut state = self.state.lock();
        let now = now_unix();

        let mut candidate_ids: Option<HashSet<NodeId>> = None;
        for role in required {
            let set = state.by_capability.get(role).cloned().unwrap_or_default();
            candidate_ids = Some(match candidate_ids {
                Some(existing) => existing.intersection(&set).copied().collect(),
                None => set,
            });
        }
        let candidate_ids = candidate_ids.unwrap_or_default();

        let mut expired_ids = Vec::new();
        let mut matched: Vec<CachedNode> = Vec::new();
        for id in &candidate_ids {
            if let Some(cached) = state.nodes.get(id) {
                if cached.is_expired(now, self.ttl_secs) {
                    expired_ids.push(*id);
                    continue;
                }
                if cached.availability_score >= min_score && cached.node_info.state == NodeState::Active {
                    matched.push(cached.clone());
                }
            }
        }
        for id in expired_ids {
            state.remove(&id);
        }

        matched.sort_by(|a, b| b.availability_score.partial_cmp(&a.availability_score).unwrap_or(std::cmp::Ordering::Equal));
        matched.truncate(count);
        matched.into_iter().map(|c| c.node_info).collect()
    }

    /// Increment miss_count and recompute score.
    pub fn mark_unavailable(&self, id: &NodeId) {
        let mut state = self.state.lock();
        if let Some(cached) = state.nodes.get_mut(id) {
            cached.miss_count += 1;
            cached.recompute_score();
        }
    }

    /// Update `last_verified`, bump hit or miss, recompute score.
    pub fn update_verification(&self, id: &NodeId, ok: bool) {
        let mut state = self.state.lock();
        if let Some(cached) = state.nodes.get_mut(id) {
            cached.last_verified = now_unix();
            if ok {
                cached.hit_count += 1;
            } else {
                cached.miss_count += 1;
            }
            cached.recompute_score();
        }
    }

    /// Sweep expired entries; return the count removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = now_unix();
        let expired: Vec<NodeId> = state
            .nodes
            .iter()
            .filter(|(_, c)| c.is_expired(now, self.ttl_secs))
            .map(|(id, _)| *id)
            .collect();
        let count = expired.len();
        for id in expired {
            state.remove(&id);
        }
        count
    }

    pub fn remove(&self, id: &NodeId) -> Option<CachedNode> {
        self.state.lock().remove(id)
    }

    pub fn snapshot(&self) -> Vec<CachedNode> {
        self.state.lock().nodes.values().cloned().collect()
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS)
    }
}

pub type SharedNodeCache = Arc<NodeCache>;

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId) -> NodeInfo {
        let mut info = NodeInfo::new(id, "127.0.0.1", 7000);
        info.state = NodeState::Active;
        info
    }

    #[test]
    fn add_then_get_round_trips() {
        let cache = NodeCache::default();
        let id = NodeId::random();
        assert!(cache.add(node(id)));
        assert!(cache.get(&id).is_some());
    }

    #[test]
    fn eviction_at_capacity_removes_lowest_score() {
        let cache = NodeCache::new(2, DEFAULT_TTL_SECS);
        let a = NodeId::random();
        let b = NodeId::random();
        let c = NodeId::random();

        cache.add(node(a));
        cache.add(node(b));
        cache.update_verification(&a, false);
        cache.update_verification(&a, false);

        cache.add(node(c));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_none() || cache.get(&b).is_some());
    }

    #[test]
    fn get_by_capabilities_filters_by_score_and_state() {
        let cache = NodeCache::default();
        let good = NodeId::random();
        let bad = NodeId::random();

        cache.add(node(good));
        cache.add(node(bad));
        cache.update_verification(&bad, false);
        cache.mark_unavailable(&bad);

        let results = cache.get_by_capabilities(&[RoleKind::Qsg], 10, 0.9);
        assert!(results.iter().any(|n| n.id == good));
        assert!(!results.iter().any(|n| n.id == bad));
    }

    #[test]
    fn cleanup_expired_removes_stale_entries() {
        let cache = NodeCache::new(DEFAULT_MAX_SIZE, 0);
        let id = NodeId::random();
        cache.add(node(id));
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
    }
}
