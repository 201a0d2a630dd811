//! `cqkd-alice` — initiator side of a key exchange: joins the swarm,
//! drives the full orchestration, and exits non-zero on failure.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use cqkd_node::config::Config;
use cqkd_node::dht::{DhtNode, UdpTransport};
use cqkd_node::orchestrator::AliceOrchestrator;
use cqkd_node::types::NodeId;

const DEFAULT_PORT: u16 = 6000;

/// Alice (initiator) node for a cqkd key exchange.
#[derive(Parser)]
#[command(name = "cqkd-alice", version, about)]
struct Args;

#[tokio::main]
async fn main() -> Result<()> {
    Args::parse();
    init_tracing();

    let mut config = Config::from_env();
    if std::env::var("DHT_PORT").is_err() {
        config.dht_port = DEFAULT_PORT;
    }
    let session_id = config.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let lc = config.key_bits;
    let config = Arc::new(config);

    let addr = std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), config.dht_port);
    let transport = Arc::new(UdpTransport::bind(addr).await?);
    let node = DhtNode::start(transport, NodeId::random(), BTreeSet::new(), config.clone()).await;

    info!(node_id = %node.local_id(), %session_id, lc, "alice node starting key exchange");
    node.bootstrap(&config.bootstrap_nodes).await;

    let orchestrator = AliceOrchestrator::new(node.clone(), config.clone());
    let result = orchestrator.run(&session_id, lc).await;
    node.shutdown();

    match result {
        Ok(key) => {
            info!(%session_id, key_bytes = key.len(), key_hex = %hex::encode(&key), "key exchange complete");
            Ok(())
        }
        Err(e) => {
            error!(%session_id, error = %e, "key exchange failed");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
