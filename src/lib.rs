//! Coordination fabric for a DHT-distributed BB84 quantum key exchange.
//!
//! A node is a generic Kademlia peer (`dht::DhtNode`) that additionally
//! holds at most one quantum role lease at a time (`roles`). Five stateless
//! role handlers (`worker::handlers`) implement the BB84 steps; two session
//! orchestrators (`orchestrator`) drive the end-to-end exchange from the
//! initiator (Alice) and receiver (Bob) sides.

pub mod bitpack;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod dht;
pub mod discovery;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod poll;
pub mod roles;
pub mod types;
pub mod worker;

pub use config::Config;
pub use dht::DhtNode;
pub use error::{CqkdError, Result};
