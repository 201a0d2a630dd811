//! Per-node role lease: gates single-role occupancy with a TTL so a worker
//! cannot multiplex conflicting quantum roles (spec §3/§4.8).
//!
//! Grounded in `CQKDNode.request_role`/`release_role`
//! (`original_source/core/dht_node.py`), which serializes both through a
//! single `asyncio.Lock`; we use `tokio::sync::Mutex` for the same
//! mutual-exclusion guarantee.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::types::{now_unix, NodeState, RoleAssignment, RoleKind};

struct LeaseState {
    node_state: NodeState,
    capabilities: std::collections::BTreeSet<RoleKind>,
    assignment: Option<RoleAssignment>,
}

/// Owns a node's `(state, current_role)` pair and enforces the spec's
/// invariant `state == Busy ⇔ current_role.is_some()`.
pub struct RoleLeaseManager {
    inner: Arc<Mutex<LeaseState>>,
}

impl RoleLeaseManager {
    pub fn new(capabilities: std::collections::BTreeSet<RoleKind>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LeaseState {
                node_state: NodeState::Off,
                capabilities,
                assignment: None,
            })),
        }
    }

    pub async fn activate(&self) {
        let mut state = self.inner.lock().await;
        if state.node_state == NodeState::Off {
            state.node_state = NodeState::Active;
        }
    }

    pub async fn state(&self) -> NodeState {
        self.inner.lock().await.node_state
    }

    pub async fn current_assignment(&self) -> Option<RoleAssignment> {
        let mut state = self.inner.lock().await;
        self.expire_if_needed(&mut state);
        state.assignment.clone()
    }

    fn expire_if_needed(&self, state: &mut LeaseState) {
        if let Some(assignment) = &state.assignment {
            if assignment.is_expired() {
                state.assignment = None;
                state.node_state = NodeState::Active;
            }
        }
    }

    /// Atomically request `role` for `session_id` with a `ttl_secs` lease.
    /// Denied if the node is not ACTIVE, the role is outside its
    /// capabilities, or an unexpired assignment already exists.
    pub async fn request_role(
        &self,
        role: RoleKind,
        session_id: impl Into<String>,
        ttl_secs: u64,
    ) -> bool {
        let mut state = self.inner.lock().await;
        self.expire_if_needed(&mut state);

        if state.node_state != NodeState::Active {
            return false;
        }
        if !state.capabilities.contains(&role) {
            return false;
        }
        if state.assignment.is_some() {
            return false;
        }

        state.assignment = Some(RoleAssignment::new(role, session_id, ttl_secs));
        state.node_state = NodeState::Busy;
        true
    }

    /// Release the current role, if any. Idempotent.
    pub async fn release_role(&self) {
        let mut state = self.inner.lock().await;
        state.assignment = None;
        if state.node_state == NodeState::Busy {
            state.node_state = NodeState::Active;
        }
    }

    pub async fn mark_error(&self) {
        let mut state = self.inner.lock().await;
        state.assignment = None;
        state.node_state = NodeState::Error;
    }

    pub async fn now() -> u64 {
        now_unix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_roles() -> std::collections::BTreeSet<RoleKind> {
        RoleKind::ALL.into_iter().collect()
    }

    #[tokio::test]
    async fn request_denied_while_off() {
        let mgr = RoleLeaseManager::new(all_roles());
        assert!(!mgr.request_role(RoleKind::Qsg, "s1", 60).await);
    }

    #[tokio::test]
    async fn request_granted_once_active_then_denied_while_busy() {
        let mgr = RoleLeaseManager::new(all_roles());
        mgr.activate().await;
        assert!(mgr.request_role(RoleKind::Qsg, "s1", 60).await);
        assert_eq!(mgr.state().await, NodeState::Busy);
        assert!(!mgr.request_role(RoleKind::Bg, "s1", 60).await);
    }

    #[tokio::test]
    async fn release_returns_to_active_and_allows_new_request() {
        let mgr = RoleLeaseManager::new(all_roles());
        mgr.activate().await;
        assert!(mgr.request_role(RoleKind::Qsg, "s1", 60).await);
        mgr.release_role().await;
        assert_eq!(mgr.state().await, NodeState::Active);
        assert!(mgr.request_role(RoleKind::Bg, "s2", 60).await);
    }

    #[tokio::test]
    async fn role_outside_capabilities_is_denied() {
        let mut caps = std::collections::BTreeSet::new();
        caps.insert(RoleKind::Qsg);
        let mgr = RoleLeaseManager::new(caps);
        mgr.activate().await;
        assert!(!mgr.request_role(RoleKind::Bg, "s1", 60).await);
    }

    #[tokio::test]
    async fn expired_lease_frees_the_node() {
        let mgr = RoleLeaseManager::new(all_roles());
        mgr.activate().await;
        assert!(mgr.request_role(RoleKind::Qsg, "s1", 0).await);
        {
            let mut state = mgr.inner.lock().await;
            if let Some(a) = state.assignment.as_mut() {
                a.expires_at = a.assigned_at.saturating_sub(10);
            }
        }
        assert!(mgr.current_assignment().await.is_none());
        assert_eq!(mgr.state().await, NodeState::Active);
    }
}
