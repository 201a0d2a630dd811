//! `cqkd-bootstrap` — a seed node: joins no one, serves DHT requests, and
//! otherwise idles. Other node types point `BOOTSTRAP_NODES` at it.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cqkd_node::config::Config;
use cqkd_node::dht::{DhtNode, UdpTransport};
use cqkd_node::types::NodeId;

const DEFAULT_PORT: u16 = 5678;

/// DHT seed node for a cqkd swarm.
#[derive(Parser)]
#[command(name = "cqkd-bootstrap", version, about)]
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

    info!(node_id = %node.local_id(), port = config.dht_port, "bootstrap node listening");

    if !config.bootstrap_nodes.is_empty() {
        node.bootstrap(&config.bootstrap_nodes).await;
    }

    tokio::signal::ctrl_c().await?;
    info!("bootstrap node shutting down");
    node.shutdown();
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
