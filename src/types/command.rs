//! Command — a DHT-addressed instruction to a worker node (spec §3/§4.9).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::node_info::RoleKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub cmd_id: String,
    pub session_id: String,
    pub role: RoleKind,
    pub operation_id: usize,
    pub params: HashMap<String, String>,
}

impl Command {
    pub fn new(
        session_id: impl Into<String>,
        role: RoleKind,
        operation_id: usize,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            cmd_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            operation_id,
            params,
        }
    }

    /// The DHT key a worker polls for commands addressed to it:
    /// `cmd:{node_id}` (spec §6.3, bit-exact).
    pub fn key_for_node(node_id: &str) -> String {
        format!("cmd:{node_id}")
    }
}
