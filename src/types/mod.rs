//! Core data model shared by every component (spec §3).

pub mod command;
pub mod node_id;
pub mod node_info;
pub mod role;
pub mod session;

pub use command::Command;
pub use node_id::{k_closest, NodeId, MAX_BUCKET_INDEX};
pub use node_info::{now_unix, NodeInfo, NodeState, RoleKind};
pub use role::RoleAssignment;
pub use session::{Basis, SessionContext};
