//! `DhtNode` — wraps a Kademlia-overlay server (spec §4.1): PUT/GET/DELETE,
//! ping, bootstrap, and access to the routing table and the per-node role
//! lease.
//!
//! Grounded in `lib-network/src/dht/mod.rs`'s `ZkDHTIntegration` wrapper
//! shape and `lib-storage/src/dht/node.rs`'s `DhtNodeManager` lifecycle
//! (start/bootstrap/put/get), generalized onto our [`super::transport`]
//! abstraction and the Python source's `CQKDNode.store_data`/`get_data`
//! (`original_source/core/dht_node.py`) for the sentinel-delete and
//! JSON-or-raw decode semantics.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CqkdError, Result};
use crate::poll::poll;
use crate::roles::RoleLeaseManager;
use crate::types::{NodeId, NodeInfo, NodeState, RoleAssignment, RoleKind};

use super::routing::{KademliaRouter, RoutingTableInfo};
use super::transport::DhtTransport;
use super::value::DhtValue;

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum WireMessage {
    Ping { req_id: Uuid, from_id: NodeId },
    Pong { req_id: Uuid, from_id: NodeId },
    Store { req_id: Uuid, from_id: NodeId, key: String, value: Vec<u8> },
    StoreAck { req_id: Uuid },
    FindNode { req_id: Uuid, from_id: NodeId, target: NodeId },
    FindNodeReply { req_id: Uuid, contacts: Vec<NodeInfo> },
    FindValue { req_id: Uuid, from_id: NodeId, key: String },
    FindValueReply { req_id: Uuid, found: Option<Vec<u8>>, contacts: Vec<NodeInfo> },
}

impl WireMessage {
    fn req_id(&self) -> Uuid {
        match self {
            WireMessage::Ping { req_id, .. }
            | WireMessage::Pong { req_id, .. }
            | WireMessage::Store { req_id, .. }
            | WireMessage::StoreAck { req_id, .. }
            | WireMessage::FindNode { req_id, .. }
            | WireMessage::FindNodeReply { req_id, .. }
            | WireMessage::FindValue { req_id, .. }
            | WireMessage::FindValueReply { req_id, .. } => *req_id,
        }
    }

    fn is_reply(&self) -> bool {
        matches!(
            self,
            WireMessage::Pong { .. }
                | WireMessage::StoreAck { .. }
                | WireMessage::FindNodeReply { .. }
                | WireMessage::FindValueReply { .. }
        )
    }
}

struct Inner {
    local_id: NodeId,
    local_addr: SocketAddr,
    transport: Arc<dyn DhtTransport>,
    routing: SyncMutex<KademliaRouter>,
    store: SyncMutex<HashMap<String, Vec<u8>>>,
    pending: SyncMutex<HashMap<Uuid, oneshot::Sender<WireMessage>>>,
    lease: RoleLeaseManager,
    shutdown: Notify,
    config: Arc<Config>,
}

/// A handle to a running DHT node. Cheaply `Clone`-able; the background
/// receive loop holds its own strong reference and outlives any particular
/// handle.
#[derive(Clone)]
pub struct DhtNode(Arc<Inner>);

impl DhtNode {
    /// Bind `transport` and begin serving requests. OFF→ACTIVE on success.
    /// Binding itself (and the IPv4 requirement) is the transport's
    /// responsibility — by the time a caller has a transport to hand in,
    /// the OFF→ERROR bind-failure transition has already happened there.
    pub async fn start(
        transport: Arc<dyn DhtTransport>,
        local_id: NodeId,
        capabilities: BTreeSet<RoleKind>,
        config: Arc<Config>,
    ) -> Self {
        let local_addr = transport.local_addr();
        let lease = RoleLeaseManager::new(capabilities);
        lease.activate().await;

        let inner = Arc::new(Inner {
            local_id,
            local_addr,
            transport,
            routing: SyncMutex::new(KademliaRouter::from_config(local_id, &config)),
            store: SyncMutex::new(HashMap::new()),
            pending: SyncMutex::new(HashMap::new()),
            lease,
            shutdown: Notify::new(),
            config,
        });

        let loop_inner = inner.clone();
        tokio::spawn(async move { Self::listen_loop(loop_inner).await });

        DhtNode(inner)
    }

    pub fn local_id(&self) -> NodeId {
        self.0.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr
    }

    pub async fn state(&self) -> NodeState {
        self.0.lease.state().await
    }

    pub fn shutdown(&self) {
        self.0.shutdown.notify_waiters();
    }

    /// Resolve `seeds` (IPv4-only, spec §4.1) and issue an iterative lookup
    /// against our own ID to populate the routing table. Never fails hard on
    /// an empty result; logs a warning instead.
    pub async fn bootstrap(&self, seeds: &[(String, u16)]) {
        for (host, port) in seeds {
            match Self::resolve_ipv4(host, *port).await {
                Ok(addr) => {
                    if let Err(e) = self.ping(addr).await {
                        tracing::warn!(%addr, error = %e, "bootstrap seed unreachable");
                    }
                }
                Err(e) => tracing::warn!(%host, error = %e, "bootstrap seed did not resolve to IPv4"),
            }
        }

        if !self.0.routing.lock().is_empty() {
            let _ = self.find_node(self.0.local_id).await;
        }

        let found = poll(
            || {
                let this = self.clone();
                async move { (!this.0.routing.lock().is_empty()).then_some(()) }
            },
            Duration::from_millis(500),
            Duration::from_secs(60),
        )
        .await;

        if found.is_none() {
            tracing::warn!(node_id = %self.0.local_id, "bootstrap completed with an empty routing table");
        }
    }

    async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
        let lookup = format!("{host}:{port}");
        let mut addrs = tokio::net::lookup_host(&lookup)
            .await
            .map_err(|e| CqkdError::Transport(format!("resolve {lookup} failed: {e}")))?;
        addrs
            .find(|a| a.is_ipv4())
            .ok_or_else(|| CqkdError::Transport(format!("{lookup} has no IPv4 address")))
    }

    /// `put(key, value)` — structured values must already be
    /// [`DhtValue::Json`]; the frame-size bound is enforced here.
    pub async fn put(&self, key: impl Into<String>, value: DhtValue) -> Result<()> {
        value.check_frame_bound()?;
        let key = key.into();
        let wire = value.to_wire();

        self.0.store.lock().insert(key.clone(), wire.clone());

        let targets = self.0.routing.lock().find_closest(&self.0.local_id, self.replication_factor());
        for target in targets {
            if let Err(e) = self.store_remote(&target, &key, &wire).await {
                tracing::debug!(peer = %target.id, error = %e, "store replica failed, refreshing routing table");
                self.0.routing.lock().remove_contact(&target.id);
                // one retry against whatever is now closest, per spec §4.1.
                if let Some(alt) = self
                    .0
                    .routing
                    .lock()
                    .find_closest(&self.0.local_id, 1)
                    .into_iter()
                    .next()
                {
                    let _ = self.store_remote(&alt, &key, &wire).await;
                }
            }
        }
        Ok(())
    }

    fn replication_factor(&self) -> usize {
        self.0.config.dht_ksize.min(3).max(1)
    }

    async fn store_remote(&self, target: &NodeInfo, key: &str, value: &[u8]) -> Result<()> {
        let req_id = Uuid::new_v4();
        let msg = WireMessage::Store {
            req_id,
            from_id: self.0.local_id,
            key: key.to_string(),
            value: value.to_vec(),
        };
        self.send_request(target.socket_addr().parse().map_err(|_| {
            CqkdError::Transport(format!("bad peer address {}", target.socket_addr()))
        })?, req_id, &msg)
        .await?;
        Ok(())
    }

    /// `get(key)` — checks the local store first, then queries the closest
    /// known peers. The delete sentinel is treated as absent.
    pub async fn get(&self, key: &str) -> Option<DhtValue> {
        if let Some(bytes) = self.0.store.lock().get(key).cloned() {
            let value = DhtValue::from_wire(bytes);
            if !value.is_deleted_sentinel() {
                return Some(value);
            }
            return None;
        }

        let candidates = self.0.routing.lock().find_closest(&self.0.local_id, self.replication_factor() * 2);
        for peer in candidates {
            if let Ok(Some(bytes)) = self.find_value_remote(&peer, key).await {
                let value = DhtValue::from_wire(bytes);
                if !value.is_deleted_sentinel() {
                    return Some(value);
                }
                return None;
            }
        }
        None
    }

    async fn find_value_remote(&self, target: &NodeInfo, key: &str) -> Result<Option<Vec<u8>>> {
        let req_id = Uuid::new_v4();
        let msg = WireMessage::FindValue {
            req_id,
            from_id: self.0.local_id,
            key: key.to_string(),
        };
        let addr: SocketAddr = target
            .socket_addr()
            .parse()
            .map_err(|_| CqkdError::Transport(format!("bad peer address {}", target.socket_addr())))?;
        match self.send_request(addr, req_id, &msg).await? {
            WireMessage::FindValueReply { found, .. } => Ok(found),
            _ => Ok(None),
        }
    }

    /// `delete(key)` — the underlying DHT has no native delete, so this
    /// writes the tombstone sentinel (spec §4.1).
    pub async fn delete(&self, key: impl Into<String>) -> Result<()> {
        self.put(key, DhtValue::raw(super::value::DELETED_SENTINEL)).await
    }

    pub fn routing_table_info(&self) -> RoutingTableInfo {
        self.0.routing.lock().info()
    }

    pub fn add_contact(&self, info: NodeInfo) {
        self.0.routing.lock().add_contact(info);
    }

    /// Remove a contact from the routing table (health-check eviction,
    /// spec §4.3). Non-fatal if the contact isn't present.
    pub fn remove_contact(&self, id: &NodeId) {
        self.0.routing.lock().remove_contact(id);
    }

    pub fn known_contacts(&self) -> Vec<NodeInfo> {
        self.0.routing.lock().all_contacts()
    }

    pub async fn request_role(
        &self,
        role: RoleKind,
        session_id: impl Into<String>,
        ttl_secs: u64,
    ) -> bool {
        self.0.lease.request_role(role, session_id, ttl_secs).await
    }

    pub async fn release_role(&self) {
        self.0.lease.release_role().await;
    }

    pub async fn current_role(&self) -> Option<RoleAssignment> {
        self.0.lease.current_assignment().await
    }

    pub async fn ping(&self, addr: SocketAddr) -> Result<()> {
        let req_id = Uuid::new_v4();
        let msg = WireMessage::Ping { req_id, from_id: self.0.local_id };
        self.send_request(addr, req_id, &msg).await?;
        Ok(())
    }

    /// Iterative FIND_NODE against `target`, α-parallel (spec §4.4 step 4).
    /// Returns the closest contacts discovered, merged with what we already
    /// know locally.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<NodeInfo>> {
        let alpha = self.0.config.base_alpha.max(1);
        let seeds = self.0.routing.lock().find_closest(&target, alpha);
        if seeds.is_empty() {
            return Ok(self.0.routing.lock().find_closest(&target, self.0.config.dht_ksize));
        }

        let mut handles = Vec::new();
        for seed in seeds {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.find_node_remote(&seed, target).await }));
        }

        for handle in handles {
            if let Ok(Ok(contacts)) = handle.await {
                for contact in contacts {
                    self.0.routing.lock().add_contact(contact);
                }
            }
        }

        Ok(self.0.routing.lock().find_closest(&target, self.0.config.dht_ksize))
    }

    async fn find_node_remote(&self, target_peer: &NodeInfo, target: NodeId) -> Result<Vec<NodeInfo>> {
        let req_id = Uuid::new_v4();
        let msg = WireMessage::FindNode { req_id, from_id: self.0.local_id, target };
        let addr: SocketAddr = target_peer
            .socket_addr()
            .parse()
            .map_err(|_| CqkdError::Transport(format!("bad peer address {}", target_peer.socket_addr())))?;
        match self.send_request(addr, req_id, &msg).await? {
            WireMessage::FindNodeReply { contacts, .. } => Ok(contacts),
            _ => Ok(Vec::new()),
        }
    }

    async fn send_request(&self, addr: SocketAddr, req_id: Uuid, msg: &WireMessage) -> Result<WireMessage> {
        let (tx, rx) = oneshot::channel();
        self.0.pending.lock().insert(req_id, tx);

        let bytes = serde_json::to_vec(msg)?;
        if let Err(e) = self.0.transport.send_to(addr, &bytes).await {
            self.0.pending.lock().remove(&req_id);
            return Err(e);
        }

        match tokio::time::timeout(RPC_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.0.pending.lock().remove(&req_id);
                Err(CqkdError::Timeout { step: format!("rpc to {addr}") })
            }
        }
    }

    async fn listen_loop(inner: Arc<Inner>) {
        loop {
            tokio::select! {
                _ = inner.shutdown.notified() => return,
                received = inner.transport.recv() => {
                    match received {
                        Ok((bytes, from)) => {
                            let inner = inner.clone();
                            tokio::spawn(async move { Self::handle_datagram(inner, bytes, from).await });
                        }
                        Err(e) => tracing::warn!(error = %e, "transport recv failed"),
                    }
                }
            }
        }
    }

    async fn handle_datagram(inner: Arc<Inner>, bytes: Vec<u8>, from: SocketAddr) {
        let Ok(msg) = serde_json::from_slice::<WireMessage>(&bytes) else {
            tracing::debug!(%from, "dropped malformed datagram");
            return;
        };

        if msg.is_reply() {
            if let Some(tx) = inner.pending.lock().remove(&msg.req_id()) {
                let _ = tx.send(msg);
            }
            return;
        }

        let reply = match &msg {
            WireMessage::Ping { req_id, from_id } => {
                inner.routing.lock().add_contact(NodeInfo::new(*from_id, from.ip().to_string(), from.port()));
                Some(WireMessage::Pong { req_id: *req_id, from_id: inner.local_id })
            }
            WireMessage::Store { req_id, from_id, key, value } => {
                inner.routing.lock().add_contact(NodeInfo::new(*from_id, from.ip().to_string(), from.port()));
                inner.store.lock().insert(key.clone(), value.clone());
                Some(WireMessage::StoreAck { req_id: *req_id })
            }
            WireMessage::FindNode { req_id, from_id, target } => {
                inner.routing.lock().add_contact(NodeInfo::new(*from_id, from.ip().to_string(), from.port()));
                let contacts = inner.routing.lock().find_closest(target, inner.config.dht_ksize);
                Some(WireMessage::FindNodeReply { req_id: *req_id, contacts })
            }
            WireMessage::FindValue { req_id, from_id, key } => {
                inner.routing.lock().add_contact(NodeInfo::new(*from_id, from.ip().to_string(), from.port()));
                let found = inner.store.lock().get(key).cloned();
                let contacts = if found.is_some() {
                    Vec::new()
                } else {
                    inner.routing.lock().find_closest(&inner.local_id, inner.config.dht_ksize)
                };
                Some(WireMessage::FindValueReply { req_id: *req_id, found, contacts })
            }
            _ => None,
        };

        if let Some(reply) = reply {
            if let Ok(bytes) = serde_json::to_vec(&reply) {
                let _ = inner.transport.send_to(from, &bytes).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::transport::InMemoryNetwork;

    fn test_config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    async fn spin_up(network: &Arc<InMemoryNetwork>, addr: &str) -> DhtNode {
        let socket_addr: SocketAddr = addr.parse().unwrap();
        let transport = Arc::new(network.register(socket_addr));
        DhtNode::start(transport, NodeId::random(), RoleKind::ALL.into_iter().collect(), test_config()).await
    }

    #[tokio::test]
    async fn put_then_get_round_trips_locally() {
        let network = InMemoryNetwork::new();
        let node = spin_up(&network, "127.0.0.1:41001").await;

        node.put("k1", DhtValue::raw("v1")).await.unwrap();
        let got = node.get("k1").await.unwrap();
        assert_eq!(got.as_str().unwrap(), "v1");
    }

    #[tokio::test]
    async fn delete_makes_subsequent_get_return_absent() {
        let network = InMemoryNetwork::new();
        let node = spin_up(&network, "127.0.0.1:41002").await;

        node.put("k2", DhtValue::raw("v2")).await.unwrap();
        node.delete("k2").await.unwrap();
        assert!(node.get("k2").await.is_none());
    }

    #[tokio::test]
    async fn ping_between_two_nodes_populates_routing_tables() {
        let network = InMemoryNetwork::new();
        let a = spin_up(&network, "127.0.0.1:41003").await;
        let b = spin_up(&network, "127.0.0.1:41004").await;

        a.ping(b.local_addr()).await.unwrap();
        assert_eq!(a.routing_table_info().total_nodes, 1);
        assert_eq!(b.routing_table_info().total_nodes, 1);
    }

    #[tokio::test]
    async fn get_falls_through_to_remote_peer_via_find_value() {
        let network = InMemoryNetwork::new();
        let a = spin_up(&network, "127.0.0.1:41005").await;
        let b = spin_up(&network, "127.0.0.1:41006").await;

        a.ping(b.local_addr()).await.unwrap();
        b.ping(a.local_addr()).await.unwrap();

        b.0.store.lock().insert("shared".into(), b"on-b".to_vec());

        let got = a.get("shared").await;
        assert_eq!(got.unwrap().as_str().unwrap(), "on-b");
    }
}
