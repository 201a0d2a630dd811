//! `cqkd-bob` — receiver side of a key exchange: joins the swarm, waits
//! for Alice's handshake, then runs its half of the exchange.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use cqkd_node::config::Config;
use cqkd_node::dht::{DhtNode, UdpTransport};
use cqkd_node::orchestrator::BobOrchestrator;
use cqkd_node::types::NodeId;

const DEFAULT_PORT: u16 = 6001;

/// Bob (receiver) node for a cqkd key exchange.
#[derive(Parser)]
#[command(name = "cqkd-bob", version, about)]
struct Args;

#[tokio::main]
async fn main() -> Result<()> {
    Args::parse();
    init_tracing();

    let mut config = Config::from_env();
    if std::env::var("DHT_PORT").is_err() {
        config.dht_port = DEFAULT_PORT;
    }
    let config = Arc::new(config);

    let addr = std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), config.dht_port);
    let transport = Arc::new(UdpTransport::bind(addr).await?);
    let node = DhtNode::start(transport, NodeId::random(), BTreeSet::new(), config.clone()).await;

    info!(node_id = %node.local_id(), port = config.dht_port, "bob node waiting for handshake");
    node.bootstrap(&config.bootstrap_nodes).await;

    let orchestrator = BobOrchestrator::new(node.clone(), config.clone());
    let result = orchestrator.run().await;
    node.shutdown();

    match result {
        Ok(key) => {
            info!(key_bytes = key.len(), key_hex = %hex::encode(&key), "key exchange complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "key exchange failed");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
