//! RoleAssignment — the lease record gating single-role occupancy per node
//! (spec §3/§4.8).

use serde::{Deserialize, Serialize};

use super::node_info::RoleKind;
use super::node_info::now_unix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: RoleKind,
    pub session_id: String,
    pub assigned_at: u64,
    pub expires_at: u64,
}

impl RoleAssignment {
    pub fn new(role: RoleKind, session_id: impl Into<String>, ttl_secs: u64) -> Self {
        let now = now_unix();
        Self {
            role,
            session_id: session_id.into(),
            assigned_at: now,
            expires_at: now + ttl_secs,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_unix() > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_assignment_is_not_expired() {
        let lease = RoleAssignment::new(RoleKind::Qsg, "sid", 300);
        assert!(!lease.is_expired());
    }

    #[test]
    fn past_expiry_assignment_is_expired() {
        let mut lease = RoleAssignment::new(RoleKind::Bg, "sid", 300);
        lease.expires_at = lease.assigned_at.saturating_sub(10);
        assert!(lease.is_expired());
    }
}
