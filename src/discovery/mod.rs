//! Peer discovery pipeline: iterative FIND_NODE, random walk, and the
//! smart composition strategy that ties them together (spec §4.4-§4.6).

pub mod node_discovery;
pub mod random_walk;
pub mod smart;

pub use node_discovery::{NodeDiscoveryResult, NodeDiscoveryService};
pub use random_walk::{RandomWalkExplorer, RandomWalkResult};
pub use smart::{DiscoveryReport, SmartDiscoveryStrategy};
