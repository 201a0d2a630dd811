//! Wire transport abstraction: raw datagram send/receive, protocol-agnostic.
//!
//! Mirrors the teacher's `DhtTransport` (`lib-storage/src/dht/transport.rs`):
//! send/receive opaque bytes to/from a peer address, nothing protocol-aware.
//! Request/response correlation and message framing live one layer up, in
//! [`super::node`]. We drop the teacher's multi-protocol `PeerId` (Bluetooth,
//! LoRaWAN, mesh...) since this overlay only ever runs over IPv4 UDP or, in
//! tests, in-process.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::error::{CqkdError, Result};

/// Datagrams above this size are rejected outright — matches the DHT
/// value bound (spec §6.3) plus a small allowance for envelope framing.
pub const MAX_DATAGRAM_BYTES: usize = 9 * 1024;

#[async_trait]
pub trait DhtTransport: Send + Sync {
    async fn send_to(&self, addr: SocketAddr, data: &[u8]) -> Result<()>;
    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)>;
    fn local_addr(&self) -> SocketAddr;
}

/// Real UDP transport, bound once at node startup.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind a UDP socket on `addr`. `addr` MUST resolve to an IPv4 endpoint
    /// (spec §4.1 `bootstrap`: "mandatory IPv4 family to avoid family
    /// mismatches").
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        if !addr.is_ipv4() {
            return Err(CqkdError::Transport(format!(
                "refusing to bind non-IPv4 address {addr}"
            )));
        }
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| CqkdError::Transport(format!("bind {addr} failed: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| CqkdError::Transport(e.to_string()))?;
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }
}

#[async_trait]
impl DhtTransport for UdpTransport {
    async fn send_to(&self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        if data.len() > MAX_DATAGRAM_BYTES {
            return Err(CqkdError::ValueTooLarge {
                size: data.len(),
                limit: MAX_DATAGRAM_BYTES,
            });
        }
        self.socket
            .send_to(data, addr)
            .await
            .map_err(|e| CqkdError::Transport(format!("send to {addr} failed: {e}")))?;
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let (len, addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| CqkdError::Transport(format!("recv failed: {e}")))?;
        buf.truncate(len);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Shared in-process "network" so multiple [`InMemoryTransport`] handles
/// can exchange datagrams without a real socket — used by the test suite
/// and the harness binary to run whole swarms inside one process.
#[derive(Default)]
pub struct InMemoryNetwork {
    mailboxes: Mutex<HashMap<SocketAddr, Arc<Mailbox>>>,
}

#[derive(Default)]
struct Mailbox {
    queue: Mutex<std::collections::VecDeque<(Vec<u8>, SocketAddr)>>,
    notify: Notify,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new endpoint on this network and return a transport
    /// handle for it.
    pub fn register(self: &Arc<Self>, addr: SocketAddr) -> InMemoryTransport {
        let mailbox = self
            .mailboxes
            .lock()
            .entry(addr)
            .or_insert_with(|| Arc::new(Mailbox::default()))
            .clone();
        InMemoryTransport {
            network: self.clone(),
            local_addr: addr,
            mailbox,
        }
    }

    fn deliver(&self, to: SocketAddr, data: Vec<u8>, from: SocketAddr) -> Result<()> {
        let mailbox = self
            .mailboxes
            .lock()
            .get(&to)
            .cloned()
            .ok_or_else(|| CqkdError::Transport(format!("no such in-memory peer {to}")))?;
        mailbox.queue.lock().push_back((data, from));
        mailbox.notify.notify_one();
        Ok(())
    }
}

pub struct InMemoryTransport {
    network: Arc<InMemoryNetwork>,
    local_addr: SocketAddr,
    mailbox: Arc<Mailbox>,
}

#[async_trait]
impl DhtTransport for InMemoryTransport {
    async fn send_to(&self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        if data.len() > MAX_DATAGRAM_BYTES {
            return Err(CqkdError::ValueTooLarge {
                size: data.len(),
                limit: MAX_DATAGRAM_BYTES,
            });
        }
        self.network.deliver(addr, data.to_vec(), self.local_addr)
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        loop {
            if let Some(item) = self.mailbox.queue.lock().pop_front() {
                return Ok(item);
            }
            self.mailbox.notify.notified().await;
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_transport_delivers_between_two_registered_peers() {
        let network = InMemoryNetwork::new();
        let a_addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let b_addr: SocketAddr = "127.0.0.1:40002".parse().unwrap();
        let a = network.register(a_addr);
        let b = network.register(b_addr);

        a.send_to(b_addr, b"hello").await.unwrap();
        let (data, from) = b.recv().await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(from, a_addr);
    }

    #[tokio::test]
    async fn send_to_unknown_peer_errors() {
        let network = InMemoryNetwork::new();
        let a = network.register("127.0.0.1:40003".parse().unwrap());
        let result = a.send_to("127.0.0.1:40099".parse().unwrap(), b"x").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversized_datagram_is_rejected() {
        let network = InMemoryNetwork::new();
        let a = network.register("127.0.0.1:40004".parse().unwrap());
        let b_addr: SocketAddr = "127.0.0.1:40005".parse().unwrap();
        network.register(b_addr);
        let big = vec![0u8; MAX_DATAGRAM_BYTES + 1];
        assert!(a.send_to(b_addr, &big).await.is_err());
    }
}
