//! `cqkd-worker` — a stateless quantum-role worker: joins the swarm, then
//! polls its own `cmd:{node_id}` key for dispatched commands forever.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cqkd_node::config::Config;
use cqkd_node::dht::{DhtNode, UdpTransport};
use cqkd_node::types::{NodeId, RoleKind};
use cqkd_node::worker::WorkerExecutor;

const DEFAULT_PORT: u16 = 7000;

/// Quantum role worker for a cqkd swarm.
#[derive(Parser)]
#[command(name = "cqkd-worker", version, about)]
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
    let node = DhtNode::start(
        transport,
        NodeId::random(),
        RoleKind::ALL.into_iter().collect(),
        config.clone(),
    )
    .await;

    info!(node_id = %node.local_id(), port = config.dht_port, "worker node listening");
    node.bootstrap(&config.bootstrap_nodes).await;

    let executor = WorkerExecutor::new(node.clone());
    tokio::select! {
        _ = executor.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("worker shutting down");
            executor.cancel();
            node.shutdown();
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
