//! NodeInfo, NodeState, RoleKind — the node-facing identity/capability
//! record exchanged over the DHT (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::node_id::NodeId;

/// The five quantum roles a worker may temporarily assume, plus the
/// dispatch-table key used by the Worker Executor (spec §4.9/§4.12 and
/// Design Notes §9 "Polymorphic worker dispatch by enum role").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    Qsg,
    Bg,
    Qpp,
    Qpm,
    Qpc,
}

impl RoleKind {
    pub const ALL: [RoleKind; 5] = [
        RoleKind::Qsg,
        RoleKind::Bg,
        RoleKind::Qpp,
        RoleKind::Qpm,
        RoleKind::Qpc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Qsg => "QSG",
            RoleKind::Bg => "BG",
            RoleKind::Qpp => "QPP",
            RoleKind::Qpm => "QPM",
            RoleKind::Qpc => "QPC",
        }
    }

    /// Priority roles eligible for deep health checks (§4.3 "critical node").
    pub fn is_critical(&self) -> bool {
        matches!(self, RoleKind::Qsg | RoleKind::Bg)
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Node lifecycle state (spec §3). Invariant: `state == Busy` iff
/// `current_role.is_some()`, enforced by [`crate::roles::RoleLeaseManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Off,
    Active,
    Busy,
    Error,
}

/// Published/cached description of a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
    pub state: NodeState,
    pub capabilities: BTreeSet<RoleKind>,
    pub last_seen: u64,
    pub current_role: Option<RoleKind>,
}

impl NodeInfo {
    /// Construct a fresh NodeInfo with every role capability (default per
    /// spec §3).
    pub fn new(id: NodeId, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
            state: NodeState::Off,
            capabilities: RoleKind::ALL.into_iter().collect(),
            last_seen: now_unix(),
            current_role: None,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_include_all_roles() {
        let info = NodeInfo::new(NodeId::zero(), "127.0.0.1", 7000);
        assert_eq!(info.capabilities.len(), 5);
        assert!(info.capabilities.contains(&RoleKind::Qsg));
    }

    #[test]
    fn critical_roles_are_qsg_and_bg_only() {
        assert!(RoleKind::Qsg.is_critical());
        assert!(RoleKind::Bg.is_critical());
        assert!(!RoleKind::Qpp.is_critical());
        assert!(!RoleKind::Qpm.is_critical());
        assert!(!RoleKind::Qpc.is_critical());
    }
}
