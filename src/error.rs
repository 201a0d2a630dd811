//! Error taxonomy for the CQKD coordination fabric.
//!
//! Library-internal failures are represented as [`CqkdError`] variants;
//! orchestration and CLI code compose these into `anyhow::Result` the way
//! the teacher workspace does throughout `lib-network`/`zhtp`.

use thiserror::Error;

/// Surface error kinds, per spec §7.
#[derive(Error, Debug)]
pub enum CqkdError {
    /// DHT PUT/GET failure, socket family mismatch, or DNS resolution failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Smart Discovery exhausted every strategy before the deadline.
    #[error("not enough nodes: found {found}, required {required}")]
    NotEnoughNodes { found: usize, required: usize },

    /// A polling loop exceeded its budget waiting for a DHT key.
    #[error("timeout waiting for step: {step}")]
    Timeout { step: String },

    /// Sift rate too low to satisfy the requested key length.
    #[error("insufficient bits after sifting: required {required}, available {available}")]
    InsufficientBitsAfterSifting { required: usize, available: usize },

    /// A role request was denied because the node is not ACTIVE.
    #[error("role busy on node {node_id}")]
    RoleBusy { node_id: String },

    /// A role request was denied because the role is outside the node's capabilities.
    #[error("role denied: {role:?} not permitted on node {node_id}")]
    RoleDenied { node_id: String, role: String },

    /// A value exceeded the ~8 kB single-frame bound at write time.
    #[error("value too large for one DHT frame: {size} bytes (limit {limit})")]
    ValueTooLarge { size: usize, limit: usize },

    /// A Command handler failed; recorded under `{session_id}:error:{cmd_id}`.
    #[error("command {cmd_id} failed: {message}")]
    CommandFailed { cmd_id: String, message: String },

    /// Configuration could not be parsed from the environment.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization of a DHT value failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CqkdError>;
