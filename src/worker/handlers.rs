//! Quantum role handlers — QSG, BG, QPP, QPM, QPC (spec §4.12).
//!
//! Grounded bit-exact in `original_source/quantum/{qsg,bg,qpp,qpm,qpc}.py`:
//! the polarization lookup table, `P(bit=0) = cos²(Δθ)` measurement, and
//! the sifting rule are ported verbatim; only the DHT key names are
//! canonicalised to spec §6.3 (the source's per-variant keys like
//! `{pid}:qpp:{i}:to_qpm:{addr}` are rejected per the Open Question
//! decision in DESIGN.md).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dht::{DhtNode, DhtValue};
use crate::error::{CqkdError, Result};
use crate::poll::poll;
use crate::types::session::Basis;

const PIPELINE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PIPELINE_POLL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QsgPayload {
    spin: u8,
    from_node: String,
    operation_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BgPayload {
    base: char,
    angles: (u16, u16),
    from_node: String,
    operation_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QppPayload {
    polarization: u16,
    alice_base: char,
    from_node: String,
    operation_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QpmResultPayload {
    bit: u8,
    from_node: String,
    operation_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QpmToQpcPayload {
    pub alice_base: char,
    pub bob_base: char,
    pub bases_match: bool,
    pub operation_id: usize,
    pub from_node: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QpcSiftingResult {
    pub valid_positions: Vec<usize>,
    pub total_bits: usize,
    pub sift_ratio: f64,
}

/// (spin, base) -> polarization angle, ported verbatim from
/// `QuantumPhotonPolarizer.POLARIZATION_MAP`.
fn polarize(spin: u8, base: char) -> u16 {
    match (spin, base) {
        (0, '+') => 0,
        (1, '+') => 90,
        (0, 'x') => 45,
        (1, 'x') => 135,
        _ => 0,
    }
}

/// `QuantumPhotonMeter.measure`: simulate a quantum measurement of
/// `alice_polarization` against `bob_base`, returning `(bit, bases_match)`.
/// `P(bit=0) = cos²(Δθ)` where `Δθ` is the normalised angle between the
/// incoming polarization and the nearer axis of Bob's base.
fn measure(alice_polarization: u16, bob_base: char) -> (u8, bool) {
    let bob_angles = Basis::from_polarization(if bob_base == '+' { 0 } else { 45 }).angles();
    let diff0 = (alice_polarization as i32 - bob_angles.0 as i32).unsigned_abs();
    let diff0 = diff0.min(180 - diff0);

    let prob_0 = (diff0 as f64).to_radians().cos().powi(2);
    let random_value: f64 = rand::random::<u32>() as f64 / u32::MAX as f64;
    let measured_bit = if random_value < prob_0 { 0 } else { 1 };

    let alice_base = Basis::from_polarization(alice_polarization).as_char();
    let bases_match = alice_base == bob_base;

    (measured_bit, bases_match)
}

async fn wait_for(node: &DhtNode, key: &str) -> Result<DhtValue> {
    poll(
        || {
            let node = node.clone();
            let key = key.to_string();
            async move { node.get(&key).await }
        },
        PIPELINE_POLL_INTERVAL,
        PIPELINE_POLL_TIMEOUT,
    )
    .await
    .ok_or_else(|| CqkdError::Timeout { step: format!("waiting for {key}") })
}

/// QSG(sid, i, alice_addr, qpp_addr): draw one uniform-random bit via a
/// CSPRNG, write it to Alice's result key and the QSG→QPP handoff key.
pub async fn qsg(node: &DhtNode, session_id: &str, i: usize) -> Result<()> {
    let spin: u8 = rand::random::<bool>() as u8;

    let payload = QsgPayload { spin, from_node: node.local_id().to_string(), operation_id: i };
    node.put(format!("{session_id}:qsg_result:{i}"), DhtValue::json(&payload)?).await?;
    node.put(format!("{session_id}:qsg_to_qpp:{i}"), DhtValue::json(&payload)?).await?;
    Ok(())
}

/// BG(sid, i, owner): draw one uniform-random basis. `owner == "alice"`
/// writes the result and the BG→QPP handoff; `owner == "bob"` writes only
/// Bob's result key.
pub async fn bg(node: &DhtNode, session_id: &str, i: usize, owner: &str) -> Result<()> {
    let basis = if rand::random::<bool>() { Basis::Plus } else { Basis::Cross };
    let payload = BgPayload {
        base: basis.as_char(),
        angles: basis.angles(),
        from_node: node.local_id().to_string(),
        operation_id: i,
    };
    let value = DhtValue::json(&payload)?;

    match owner {
        "alice" => {
            node.put(format!("{session_id}:bg_alice_result:{i}"), value.clone()).await?;
            node.put(format!("{session_id}:bg_to_qpp:{i}"), value).await?;
        }
        "bob" => {
            node.put(format!("{session_id}:bg_bob_result:{i}"), value).await?;
        }
        other => {
            return Err(CqkdError::CommandFailed {
                cmd_id: format!("bg:{session_id}:{i}"),
                message: format!("unknown BG owner {other:?}"),
            })
        }
    }
    Ok(())
}

/// QPP(sid, i): wait for the QSG spin and the BG basis, compute
/// polarization via the fixed (spin, base) table, write to `qpp_to_qpm:{i}`.
pub async fn qpp(node: &DhtNode, session_id: &str, i: usize) -> Result<()> {
    let spin_value = wait_for(node, &format!("{session_id}:qsg_to_qpp:{i}")).await?;
    let base_value = wait_for(node, &format!("{session_id}:bg_to_qpp:{i}")).await?;

    let spin: QsgPayload = spin_value.deserialize()?;
    let base: BgPayload = base_value.deserialize()?;

    let polarization = polarize(spin.spin, base.base);
    let payload = QppPayload {
        polarization,
        alice_base: base.base,
        from_node: node.local_id().to_string(),
        operation_id: i,
    };
    node.put(format!("{session_id}:qpp_to_qpm:{i}"), DhtValue::json(&payload)?).await?;
    Ok(())
}

/// QPM(sid, i): wait for Alice's polarization and Bob's basis, measure,
/// write Bob's bit and the reconciliation record for QPC.
pub async fn qpm(node: &DhtNode, session_id: &str, i: usize) -> Result<()> {
    let pol_value = wait_for(node, &format!("{session_id}:qpp_to_qpm:{i}")).await?;
    let bob_base_value = wait_for(node, &format!("{session_id}:bg_bob_result:{i}")).await?;

    let pol: QppPayload = pol_value.deserialize()?;
    let bob_base: BgPayload = bob_base_value.deserialize()?;

    let (bit, bases_match) = measure(pol.polarization, bob_base.base);

    let result = QpmResultPayload { bit, from_node: node.local_id().to_string(), operation_id: i };
    node.put(format!("{session_id}:qpm_result:{i}"), DhtValue::json(&result)?).await?;

    let reconciliation = QpmToQpcPayload {
        alice_base: pol.alice_base,
        bob_base: bob_base.base,
        bases_match,
        operation_id: i,
        from_node: node.local_id().to_string(),
    };
    node.put(format!("{session_id}:qpm_to_qpc:{i}"), DhtValue::json(&reconciliation)?).await?;
    Ok(())
}

/// QPC(sid, lk): gather the per-position reconciliation records, treating
/// a missing entry as `bases_match=false` to preserve index alignment, and
/// publish `valid_positions`. Coordinator-side per the spec's Open
/// Question decision — not dispatched through the role lease by default.
pub async fn qpc(node: &DhtNode, session_id: &str, lk: usize) -> Result<QpcSiftingResult> {
    let mut valid_positions = Vec::new();

    for i in 0..lk {
        let key = format!("{session_id}:qpm_to_qpc:{i}");
        let matched = match poll(
            || {
                let node = node.clone();
                let key = key.clone();
                async move { node.get(&key).await }
            },
            PIPELINE_POLL_INTERVAL,
            PIPELINE_POLL_TIMEOUT,
        )
        .await
        {
            Some(value) => value.deserialize::<QpmToQpcPayload>().map(|p| p.bases_match).unwrap_or(false),
            None => false,
        };
        if matched {
            valid_positions.push(i);
        }
    }

    let result = QpcSiftingResult {
        sift_ratio: if lk > 0 { valid_positions.len() as f64 / lk as f64 } else { 0.0 },
        total_bits: lk,
        valid_positions,
    };
    node.put(format!("{session_id}:qpc_sifting_result"), DhtValue::json(&result)?).await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dht::transport::InMemoryNetwork;
    use crate::types::{NodeId, RoleKind};
    use std::sync::Arc;

    async fn test_node(addr: &str) -> DhtNode {
        let network = InMemoryNetwork::new();
        let socket_addr: std::net::SocketAddr = addr.parse().unwrap();
        let transport = Arc::new(network.register(socket_addr));
        DhtNode::start(transport, NodeId::random(), RoleKind::ALL.into_iter().collect(), Arc::new(Config::default()))
            .await
    }

    #[test]
    fn polarization_table_matches_spec() {
        assert_eq!(polarize(0, '+'), 0);
        assert_eq!(polarize(1, '+'), 90);
        assert_eq!(polarize(0, 'x'), 45);
        assert_eq!(polarize(1, 'x'), 135);
    }

    #[test]
    fn matching_bases_always_measure_the_sent_bit_deterministically() {
        // alice_polarization=0 ('+' base, bit 0) measured against bob_base='+':
        // Δθ=0 so P(bit=0)=1, deterministically bit=0, bases_match=true.
        let (bit, bases_match) = measure(0, '+');
        assert_eq!(bit, 0);
        assert!(bases_match);

        // alice_polarization=90 ('+' base, bit 1) vs bob_base='+': Δθ=90 to
        // the bit-0 axis (0°), so P(bit=0)=0, deterministically bit=1.
        let (bit, bases_match) = measure(90, '+');
        assert_eq!(bit, 1);
        assert!(bases_match);
    }

    #[test]
    fn mismatched_bases_are_reported_as_such() {
        let (_, bases_match) = measure(0, 'x');
        assert!(!bases_match);
    }

    #[tokio::test]
    async fn full_pipeline_for_one_position_produces_a_sifting_record() {
        let node = test_node("127.0.0.1:44001").await;
        let sid = "test-session";

        qsg(&node, sid, 0).await.unwrap();
        bg(&node, sid, 0, "alice").await.unwrap();
        bg(&node, sid, 0, "bob").await.unwrap();
        qpp(&node, sid, 0).await.unwrap();
        qpm(&node, sid, 0).await.unwrap();

        let result = qpc(&node, sid, 1).await.unwrap();
        assert_eq!(result.total_bits, 1);
        assert!(result.valid_positions == vec![0] || result.valid_positions.is_empty());
    }

    #[tokio::test]
    async fn bg_rejects_unknown_owner() {
        let node = test_node("127.0.0.1:44002").await;
        let result = bg(&node, "sid", 0, "mallory").await;
        assert!(matches!(result, Err(CqkdError::CommandFailed { .. })));
    }
}
