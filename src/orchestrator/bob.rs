//! Bob orchestrator — the receiver side of the 19-step choreography
//! (spec §4.11, steps 12-17 and 18-19).
//!
//! Grounded in `original_source/orchestrator/bob_orchestrator.py`'s
//! handshake-polling loop; canonicalised onto `cqkd_process_id` +
//! `{sid}:alice_to_bob` per the Open Question decision in DESIGN.md.

use std::time::Duration;

use crate::bitpack::bits_to_bytes;
use crate::config::Config;
use crate::dht::{DhtNode, DhtValue};
use crate::error::{CqkdError, Result};
use crate::poll::poll;
use crate::types::{now_unix, Command, RoleKind};

use super::alice::{AliceToBobHandshake, CompletionRecord};
use crate::worker::handlers::QpcSiftingResult;

const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const HANDSHAKE_VALIDATION_WINDOW: Duration = Duration::from_secs(5);
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RESULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const QPC_POLL_TIMEOUT: Duration = Duration::from_secs(60);
const COMPLETION_BUDGET_BYTES: usize = 8 * 1024;

pub struct BobOrchestrator {
    node: DhtNode,
    config: std::sync::Arc<Config>,
}

impl BobOrchestrator {
    pub fn new(node: DhtNode, config: std::sync::Arc<Config>) -> Self {
        Self { node, config }
    }

    /// Block until a fresh, validated session appears on `cqkd_process_id`,
    /// then run the exchange. Writes a completion record on every exit path.
    pub async fn run(&self) -> Result<Vec<u8>> {
        let session_id = self.await_handshake(None).await?;
        let result = self.run_inner(&session_id).await;

        let completion = match &result {
            Ok(bytes) => CompletionRecord {
                status: "done",
                ts: now_unix(),
                orchestrator_id: self.node.local_id().to_string(),
                role_counts: Default::default(),
                role_samples: Default::default(),
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
                    role_counts: Default::default(),
                    role_samples: Default::default(),
                    key_bits: None,
                    error: Some(message),
                }
            }
        };
        self.write_completion(&session_id, completion).await;

        result
    }

    /// INIT → AWAIT_HANDSHAKE (step 12): poll `cqkd_process_id`, ignoring
    /// `None`/the delete sentinel/`previously_seen`, and require
    /// `{sid}:alice_to_bob` to appear within the validation window before
    /// accepting the candidate — else it's stale.
    pub async fn await_handshake(&self, previously_seen: Option<&str>) -> Result<String> {
        let previously_seen = previously_seen.map(str::to_string);
        loop {
            let node = self.node.clone();
            let candidate = poll(
                move || {
                    let node = node.clone();
                    async move { node.get("cqkd_process_id").await }
                },
                HANDSHAKE_POLL_INTERVAL,
                self.config.max_query_timeout_as_handshake_budget(),
            )
            .await
            .filter(|v| !v.is_deleted_sentinel())
            .and_then(|v| v.as_str())
            .filter(|s| previously_seen.as_deref() != Some(s.as_str()));

            let Some(session_id) = candidate else {
                return Err(CqkdError::Timeout { step: "cqkd_process_id".to_string() });
            };

            let handshake_key = format!("{session_id}:alice_to_bob");
            let node = self.node.clone();
            let confirmed = poll(
                move || {
                    let node = node.clone();
                    let key = handshake_key.clone();
                    async move { node.get(&key).await }
                },
                Duration::from_millis(200),
                HANDSHAKE_VALIDATION_WINDOW,
            )
            .await;

            if confirmed.is_some() {
                return Ok(session_id);
            }
            tracing::warn!(%session_id, "candidate session stale: alice_to_bob not confirmed in time");
            // loop again, now treating this session_id as seen-and-rejected
            // implicitly via a fresh poll of cqkd_process_id.
        }
    }

    async fn run_inner(&self, session_id: &str) -> Result<Vec<u8>> {
        let handshake_value = self
            .await_key(&format!("{session_id}:alice_to_bob"))
            .await?;
        let handshake: AliceToBobHandshake = handshake_value.deserialize()?;

        // DISPATCH_BG_BOB (step 13): one BG(owner="bob") command per
        // position, addressed to the BG nodes Alice published.
        for (i, node_id) in handshake.bg_nodes.iter().enumerate() {
            let mut params = std::collections::HashMap::new();
            params.insert("owner".to_string(), "bob".to_string());
            let command = Command::new(session_id.to_string(), RoleKind::Bg, i, params);
            self.node.put(Command::key_for_node(node_id), DhtValue::json(&command)?).await?;
        }

        // COLLECT_BASES (step 14).
        let mut bob_bases = vec!['+'; handshake.lk];
        for i in 0..handshake.lk {
            let value = self.await_key(&format!("{session_id}:bg_bob_result:{i}")).await?;
            bob_bases[i] = value
                .get("base")
                .and_then(|v| v.as_str())
                .and_then(|s| s.chars().next())
                .ok_or_else(|| CqkdError::Timeout { step: format!("bg_bob_result:{i} malformed") })?;
        }

        // COLLECT_MEASUREMENTS (step 15-17): QPM runs as a worker role
        // dispatched by Alice; Bob only reads the resulting bit.
        let mut bob_bits = vec![0u8; handshake.lk];
        for i in 0..handshake.lk {
            let value = self.await_key(&format!("{session_id}:qpm_result:{i}")).await?;
            bob_bits[i] = value
                .get("bit")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| CqkdError::Timeout { step: format!("qpm_result:{i} malformed") })? as u8;
        }

        // AWAIT_QPC: Bob does not run QPC himself (it runs coordinator-side
        // on Alice); he only polls the published result.
        let sifting_value = self
            .await_key_with_timeout(&format!("{session_id}:qpc_sifting_result"), QPC_POLL_TIMEOUT)
            .await?;
        let sifting: QpcSiftingResult = sifting_value.deserialize()?;

        // EXTRACT (step 19): `valid_positions` is computed by QPC entirely
        // in original, pre-shuffle index space (DISPATCH_QUANTUM runs
        // before SHUFFLE), and `bob_bits` above is collected the same way —
        // indexed by the same dispatch-time `i`. So `pos` addresses
        // `bob_bits` directly; no permutation is applied here. Identical
        // MSB-first packing on both sides.
        if sifting.valid_positions.len() < handshake.lc {
            return Err(CqkdError::InsufficientBitsAfterSifting {
                required: handshake.lc,
                available: sifting.valid_positions.len(),
            });
        }
        let sifted_bits: Vec<u8> = sifting
            .valid_positions
            .iter()
            .take(handshake.lc)
            .map(|&pos| bob_bits[pos])
            .collect();

        Ok(bits_to_bytes(&sifted_bits))
    }

    async fn await_key(&self, key: &str) -> Result<serde_json::Value> {
        self.await_key_with_timeout(key, RESULT_POLL_TIMEOUT).await
    }

    async fn await_key_with_timeout(&self, key: &str, timeout: Duration) -> Result<serde_json::Value> {
        let node = self.node.clone();
        let owned_key = key.to_string();
        let value = poll(
            move || {
                let node = node.clone();
                let key = owned_key.clone();
                async move { node.get(&key).await }
            },
            RESULT_POLL_INTERVAL,
            timeout,
        )
        .await
        .ok_or_else(|| CqkdError::Timeout { step: key.to_string() })?;

        value.deserialize::<serde_json::Value>()
    }

    async fn write_completion(&self, session_id: &str, record: CompletionRecord) {
        let Ok(mut value) = DhtValue::json(&record) else { return };
        if value.byte_len() > COMPLETION_BUDGET_BYTES {
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

trait HandshakeBudget {
    fn max_query_timeout_as_handshake_budget(&self) -> Duration;
}

impl HandshakeBudget for Config {
    /// Bob's outer handshake-wait loop reuses the discovery timeout ceiling
    /// as its polling budget per attempt; the loop itself retries forever.
    fn max_query_timeout_as_handshake_budget(&self) -> Duration {
        Duration::from_secs(self.max_discovery_timeout)
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

    #[tokio::test]
    async fn handshake_is_rejected_when_alice_to_bob_never_appears() {
        let node = test_node("127.0.0.1:47001").await;
        let bob = BobOrchestrator::new(node.clone(), Arc::new(Config::default()));

        // Publish only the process id, never the handshake payload.
        node.put("cqkd_process_id", DhtValue::raw("stale-session")).await.unwrap();

        let result = bob.await_handshake(None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn handshake_is_accepted_once_alice_to_bob_is_visible() {
        let node = test_node("127.0.0.1:47002").await;
        let bob = BobOrchestrator::new(node.clone(), Arc::new(Config::default()));

        node.put("cqkd_process_id", DhtValue::raw("s1")).await.unwrap();
        node.put("s1:alice_to_bob", DhtValue::json(serde_json::json!({"ready": true})).unwrap())
            .await
            .unwrap();

        let accepted = bob.await_handshake(None).await.unwrap();
        assert_eq!(accepted, "s1");
    }

    #[tokio::test]
    async fn previously_seen_session_is_ignored() {
        let node = test_node("127.0.0.1:47003").await;
        let bob = BobOrchestrator::new(node.clone(), Arc::new(Config::default()));

        node.put("cqkd_process_id", DhtValue::raw("s1")).await.unwrap();
        node.put("s1:alice_to_bob", DhtValue::json(serde_json::json!({"ready": true})).unwrap())
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(300), bob.await_handshake(Some("s1"))).await;
        assert!(result.is_err(), "expected the poll to still be waiting past the deadline");
    }
}
