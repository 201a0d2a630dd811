//! `cqkd-harness` — drives one whole key exchange inside a single process,
//! over [`InMemoryNetwork`] instead of real sockets. No `BOOTSTRAP_NODES`
//! dialing, no UDP binding: useful for smoke-testing a build and for the
//! worked example in the crate docs.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cqkd_node::config::Config;
use cqkd_node::dht::{DhtNode, InMemoryNetwork};
use cqkd_node::orchestrator::{AliceOrchestrator, BobOrchestrator};
use cqkd_node::types::{NodeId, RoleKind};
use cqkd_node::worker::WorkerExecutor;

/// In-process smoke test: stand up a full swarm and run one exchange.
#[derive(Parser)]
#[command(name = "cqkd-harness", version, about)]
struct Args {
    /// Desired final key length in bits.
    #[arg(long, default_value_t = 8)]
    bits: usize,
    /// Number of quantum-role worker nodes to spawn.
    #[arg(long, default_value_t = 40)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = Arc::new(Config::default());
    let network = InMemoryNetwork::new();
    let mut port = 20000u16;

    let mut next_node = |capabilities: BTreeSet<RoleKind>| {
        let config = config.clone();
        let network = network.clone();
        port += 1;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        async move {
            let transport = Arc::new(network.register(addr));
            DhtNode::start(transport, NodeId::random(), capabilities, config).await
        }
    };

    let mut workers = Vec::with_capacity(args.workers);
    for _ in 0..args.workers {
        let node = next_node(RoleKind::ALL.into_iter().collect()).await;
        workers.push(node.clone());
        tokio::spawn(async move { WorkerExecutor::new(node).run().await });
    }
    info!(workers = args.workers, "worker swarm up");

    let alice_node = next_node(BTreeSet::new()).await;
    let bob_node = next_node(BTreeSet::new()).await;

    // Every node needs the others in its routing table; in-memory transport
    // has no DNS/ping round trip to discover peers organically, so seed
    // each node's table directly from the others' published NodeInfo.
    let all_nodes: Vec<DhtNode> = workers
        .iter()
        .cloned()
        .chain([alice_node.clone(), bob_node.clone()])
        .collect();
    seed_routing_tables(&all_nodes);

    let session_id = uuid::Uuid::new_v4().to_string();
    let bob_config = config.clone();
    let bob_handle = tokio::spawn(async move {
        BobOrchestrator::new(bob_node, bob_config).run().await
    });

    let alice = AliceOrchestrator::new(alice_node, config.clone());
    let alice_key = alice.run(&session_id, args.bits).await?;
    let bob_key = bob_handle.await??;

    info!(
        %session_id,
        alice_key_hex = %hex::encode(&alice_key),
        bob_key_hex = %hex::encode(&bob_key),
        keys_match = alice_key == bob_key,
        "harness run complete"
    );
    if alice_key != bob_key {
        anyhow::bail!("alice and bob derived different keys");
    }
    Ok(())
}

fn seed_routing_tables(nodes: &[DhtNode]) {
    let infos: Vec<_> = nodes.iter().map(|n| to_node_info(n)).collect();
    for node in nodes {
        for info in &infos {
            if info.id != node.local_id() {
                node.add_contact(info.clone());
            }
        }
    }
}

fn to_node_info(node: &DhtNode) -> cqkd_node::types::NodeInfo {
    let addr = node.local_addr();
    let mut info = cqkd_node::types::NodeInfo::new(node.local_id(), addr.ip().to_string(), addr.port());
    info.state = cqkd_node::types::NodeState::Active;
    info
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
