//! The DHT layer: wire transport, Kademlia routing table, tagged values,
//! and the node façade that composes them (spec §4.1).

pub mod node;
pub mod routing;
pub mod transport;
pub mod value;

pub use node::DhtNode;
pub use routing::{KademliaRouter, RoutingTableInfo};
pub use transport::{DhtTransport, InMemoryNetwork, InMemoryTransport, UdpTransport};
pub use value::DhtValue;
