//! Alice orchestrator — the initiator side of the 19-step choreography
//! (spec §4.10, steps 1-11 and 18-19).
//!
//! Grounded in `original_source/orchestrator/alice_orchestrator.py`'s
//! state machine; canonicalised onto the single `{sid}:alice_to_bob`
//! handshake key and `cmd:{node_id}` addressing per the Open Question
//! decision recorded in DESIGN.md (the source's divergent variants are
//! rejected).

use std::collections::HashMap;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::bitpack::bits_to_bytes;
use crate::config::Config;
use crate::dht::{DhtNode, DhtValue};
use crate::discovery::SmartDiscoveryStrategy;
use crate::error::{CqkdError, Result};
use crate::poll::poll;
use crate::types::{now_unix, Command, NodeId, NodeInfo, RoleKind, SessionContext};
use crate::worker::handlers::qpc;

const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RESULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const COMPLETION_BUDGET_BYTES: usize = 8 * 1024;
const SAMPLE_IDS_PER_ROLE: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliceToBobHandshake {
    pub lc: usize,
    pub lk: usize,
    pub sorting_rule: Vec<usize>,
    pub alice_bases: Vec<char>,
    pub qpm_nodes: Vec<String>,
    pub qpc_node: String,
    pub bg_nodes: Vec<String>,
    pub alice_node: String,
    pub ts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub status: &'static str,
    pub ts: u64,
    pub orchestrator_id: String,
    pub role_counts: HashMap<String, usize>,
    pub role_samples: HashMap<String, Vec<String>>,
    pub key_bits: Option<usize>,
    pub error: Option<String>,
}

pub struct AliceOrchestrator {
    node: DhtNode,
    config: std::sync::Arc<Config>,
    discovery: SmartDiscoveryStrategy,
}

fn allocation_summary(ctx: &SessionContext) -> (HashMap<String, usize>, HashMap<String, Vec<String>>) {
    let mut counts = HashMap::new();
    let mut samples = HashMap::new();
    for (role, nodes) in &ctx.allocation {
        counts.insert(role.as_str().to_string(), nodes.len());
        samples.insert(
            role.as_str().to_string(),
            nodes.iter().take(SAMPLE_IDS_PER_ROLE).map(|id| id.to_string()).collect(),
        );
    }
    (counts, samples)
}

impl AliceOrchestrator {
    pub fn new(node: DhtNode, config: std::sync::Arc<Config>) -> Self {
        let discovery = SmartDiscoveryStrategy::new(node.clone(), config.clone());
        Self { node, config, discovery }
    }

    /// Run the full 1-11, 18-19 choreography for a desired final key length
    /// `lc`, writing a completion record on every exit path.
    pub async fn run(&self, session_id: &str, lc: usize) -> Result<Vec<u8>> {
        let ctx_slot: parking_lot::Mutex<Option<SessionContext>> = parking_lot::Mutex::new(None);
        let result = self.run_inner(session_id, lc, &ctx_slot).await;

        let (role_counts, role_samples) = ctx_slot
            .lock()
            .as_ref()
            .map(allocation_summary)
            .unwrap_or_default();

        let completion = match &result {
            Ok(bytes) => CompletionRecord {
                status: "done",
                ts: now_unix(),
                orchestrator_id: self.node.local_id().to_string(),
                role_counts,
                role_samples,
                key_bits: Some(bytes.len() * 8),
                error: None,
            },
            Err(e) => {
                let mut message = e.to_string();
                message.truncate(500);
                CompletionRecord {
                    status: "failed",
                    ts: now_unix(),
                    orchestrator_id: self.node.local_id().to_string(),
                    role_counts,
                    role_samples,
                    key_bits: None,
                    error: Some(message),
                }
            }
        };
        self.write_completion(session_id, completion).await;

        result
    }

    async fn run_inner(
        &self,
        session_id: &str,
        lc: usize,
        ctx_slot: &parking_lot::Mutex<Option<SessionContext>>,
    ) -> Result<Vec<u8>> {
        // SIZING (step 1).
        let lk = self.config.lk(lc);
        let alpha = self.config.required_node_count(lk);
        let mut ctx = SessionContext::new(session_id, lc, lk, alpha);

        // DISCOVERING (step 2): retry budget >= 2, per spec §4.10.
        let mut discovered: Vec<NodeInfo> = Vec::new();
        let mut attempts = 0;
        let retry_budget = 2;
        loop {
            attempts += 1;
            match self.discovery.discover_nodes(alpha, &[], true).await {
                Ok(report) => {
                    discovered = report.discovered_nodes;
                    break;
                }
                Err(e) if attempts < retry_budget => {
                    tracing::warn!(attempt = attempts, error = %e, "discovery attempt failed, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        if discovered.len() < alpha {
            return Err(CqkdError::NotEnoughNodes { found: discovered.len(), required: alpha });
        }

        // ALLOCATING (step 3): five contiguous slices of length lk, in
        // QSG, BG, QPP, QPM, QPC order.
        discovered.sort_by_key(|n| n.id.distance_key(&self.node.local_id()));
        let roles = [RoleKind::Qsg, RoleKind::Bg, RoleKind::Qpp, RoleKind::Qpm, RoleKind::Qpc];
        for (slot, role) in roles.iter().enumerate() {
            let start = slot * lk;
            let slice: Vec<NodeId> = discovered[start..start + lk].iter().map(|n| n.id).collect();
            ctx.allocation.insert(*role, slice);
        }
        *ctx_slot.lock() = Some(ctx.clone());

        // OPEN_SESSION: nothing to publish yet beyond the allocation itself;
        // the handshake is written after collection, at NOTIFY_BOB.

        // DISPATCH_QUANTUM (step dispatch): for each i, write Commands to
        // the i-th QSG/BG/QPP/QPM nodes. QPP and QPM carry the downstream
        // node's address as a parameter — informational only, since every
        // handler still reads its actual inputs from the DHT.
        for i in 0..lk {
            self.dispatch(&ctx, RoleKind::Qsg, i, HashMap::new()).await?;

            let mut bg_params = HashMap::new();
            bg_params.insert("owner".to_string(), "alice".to_string());
            self.dispatch(&ctx, RoleKind::Bg, i, bg_params).await?;

            let mut qpp_params = HashMap::new();
            qpp_params.insert("qpm_addr".to_string(), ctx.allocation[&RoleKind::Qpm][i].to_string());
            self.dispatch(&ctx, RoleKind::Qpp, i, qpp_params).await?;

            let mut qpm_params = HashMap::new();
            qpm_params.insert("qpc_addr".to_string(), ctx.allocation[&RoleKind::Qpc][i].to_string());
            self.dispatch(&ctx, RoleKind::Qpm, i, qpm_params).await?;
        }

        // COLLECT_QSG_BG (step 8-9).
        let mut alice_bits = vec![0u8; lk];
        let mut alice_bases = vec!['+'; lk];
        for i in 0..lk {
            let bit_value = self.await_key(&format!("{session_id}:qsg_result:{i}")).await?;
            let base_value = self.await_key(&format!("{session_id}:bg_alice_result:{i}")).await?;

            alice_bits[i] = bit_value
                .get("spin")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| CqkdError::Timeout { step: format!("qsg_result:{i} malformed") })? as u8;
            alice_bases[i] = base_value
                .get("base")
                .and_then(|v| v.as_str())
                .and_then(|s| s.chars().next())
                .ok_or_else(|| CqkdError::Timeout { step: format!("bg_alice_result:{i} malformed") })?;
        }

        // SHUFFLE (step 10): CSPRNG permutation, retained as sorting_rule.
        // `valid_positions` from QPC is computed entirely in original,
        // pre-shuffle index space (it polls `qpm_to_qpc:{i}` for the same
        // `i` used throughout DISPATCH_QUANTUM, before SHUFFLE runs), so
        // `ctx.alice_bits`/`ctx.alice_bases` stay unshuffled here — EXTRACT
        // indexes them directly by the original-space positions in
        // `valid_positions`. `shuffled_bases` is still sent to Bob in the
        // handshake as the informational record of the permutation applied.
        let mut sorting_rule: Vec<usize> = (0..lk).collect();
        sorting_rule.shuffle(&mut rand::thread_rng());
        let shuffled_bases: Vec<char> = sorting_rule.iter().map(|&i| alice_bases[i]).collect();
        ctx.sorting_rule = sorting_rule.clone();
        ctx.alice_bits = alice_bits;
        ctx.alice_bases = alice_bases.iter().map(|&c| if c == '+' { crate::types::Basis::Plus } else { crate::types::Basis::Cross }).collect();

        // NOTIFY_BOB (step 11).
        let qpm_nodes: Vec<String> = ctx.allocation[&RoleKind::Qpm].iter().map(|id| id.to_string()).collect();
        let bg_nodes: Vec<String> = ctx.allocation[&RoleKind::Bg].iter().map(|id| id.to_string()).collect();
        let qpc_node = ctx.allocation[&RoleKind::Qpc].first().map(|id| id.to_string()).unwrap_or_default();
        let handshake = AliceToBobHandshake {
            lc,
            lk,
            sorting_rule: sorting_rule.clone(),
            alice_bases: shuffled_bases,
            qpm_nodes,
            qpc_node,
            bg_nodes,
            alice_node: self.node.local_id().to_string(),
            ts: now_unix(),
        };
        self.node.put(format!("{session_id}:alice_to_bob"), DhtValue::json(&handshake)?).await?;
        self.node.put("cqkd_process_id", DhtValue::raw(session_id)).await?;

        // AWAIT_QPC: QPC runs coordinator-side (no role lease, per the Open
        // Question decision), gathering `qpm_to_qpc:{i}` itself and writing
        // `qpc_sifting_result` before returning.
        let sifting = qpc(&self.node, session_id, lk).await?;

        // EXTRACT (step 19).
        if sifting.valid_positions.len() < lc {
            return Err(CqkdError::InsufficientBitsAfterSifting {
                required: lc,
                available: sifting.valid_positions.len(),
            });
        }
        let sifted_bits: Vec<u8> = sifting
            .valid_positions
            .iter()
            .take(lc)
            .map(|&pos| ctx.alice_bits[pos])
            .collect();
        ctx.valid_positions = sifting.valid_positions;

        Ok(bits_to_bytes(&sifted_bits))
    }

    async fn dispatch(
        &self,
        ctx: &SessionContext,
        role: RoleKind,
        i: usize,
        params: HashMap<String, String>,
    ) -> Result<()> {
        let target = ctx.allocation[&role][i];
        let command = Command::new(ctx.session_id.clone(), role, i, params);
        self.node.put(Command::key_for_node(&target.to_string()), DhtValue::json(&command)?).await?;
        Ok(())
    }

    async fn await_key(&self, key: &str) -> Result<serde_json::Value> {
        let node = self.node.clone();
        let owned_key = key.to_string();
        let value = poll(
            move || {
                let node = node.clone();
                let key = owned_key.clone();
                async move { node.get(&key).await }
            },
            RESULT_POLL_INTERVAL,
            RESULT_POLL_TIMEOUT,
        )
        .await
        .ok_or_else(|| CqkdError::Timeout { step: key.to_string() })?;

        value.deserialize::<serde_json::Value>()
    }

    async fn write_completion(&self, session_id: &str, record: CompletionRecord) {
        let Ok(mut value) = DhtValue::json(&record) else { return };
        if value.byte_len() > COMPLETION_BUDGET_BYTES {
            // Truncate the error message further and retry once; the
            // record itself is already bounded to a handful of scalars.
            let mut record = record;
            if let Some(error) = record.error.as_mut() {
                error.truncate(200);
            }
            value = match DhtValue::json(&record) {
                Ok(v) => v,
                Err(_) => return,
            };
        }
        let _ = self.node.put(format!("{session_id}:completion"), value).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::transport::InMemoryNetwork;
    use crate::types::NodeId;
    use std::sync::Arc;

    async fn test_node(addr: &str) -> DhtNode {
        let network = InMemoryNetwork::new();
        let socket_addr: std::net::SocketAddr = addr.parse().unwrap();
        let transport = Arc::new(network.register(socket_addr));
        DhtNode::start(transport, NodeId::random(), RoleKind::ALL.into_iter().collect(), Arc::new(Config::default()))
            .await
    }

    #[test]
    fn allocation_summary_caps_samples_per_role() {
        let mut ctx = SessionContext::new("sid", 2, 5, 25);
        ctx.allocation.insert(RoleKind::Qsg, (0..5).map(|_| NodeId::random()).collect());
        let (counts, samples) = allocation_summary(&ctx);
        assert_eq!(counts["QSG"], 5);
        assert_eq!(samples["QSG"].len(), SAMPLE_IDS_PER_ROLE);
    }

    #[tokio::test]
    async fn failing_run_writes_a_failed_completion_record_with_truncated_error() {
        let node = test_node("127.0.0.1:46001").await;
        let orchestrator = AliceOrchestrator::new(node.clone(), Arc::new(Config::default()));

        // No peers in this swarm: discovery will come up empty and the
        // session must fail with NotEnoughNodes, but a completion record is
        // still written.
        let result = orchestrator.run("sid", 2).await;
        assert!(result.is_err());

        let completion = node.get("sid:completion").await.unwrap();
        let record: CompletionRecord = completion.deserialize().unwrap();
        assert_eq!(record.status, "failed");
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn dispatch_writes_a_command_the_target_node_can_read() {
        let node = test_node("127.0.0.1:46002").await;
        let orchestrator = AliceOrchestrator::new(node.clone(), Arc::new(Config::default()));

        let mut ctx = SessionContext::new("sid", 2, 1, 5);
        let target = NodeId::random();
        ctx.allocation.insert(RoleKind::Qsg, vec![target]);

        orchestrator.dispatch(&ctx, RoleKind::Qsg, 0, HashMap::new()).await.unwrap();

        let key = Command::key_for_node(&target.to_string());
        let command: Command = node.get(&key).await.unwrap().deserialize().unwrap();
        assert_eq!(command.role, RoleKind::Qsg);
        assert_eq!(command.session_id, "sid");
    }
}
