//! The `Raw`/`Json` tagged DHT value (Design Notes §9: "Dynamic typing of
//! DHT payloads" — the source treats values interchangeably as strings,
//! JSON, or lists; we re-architect with two explicit variants at the
//! boundary).

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CqkdError, Result};

/// Sentinel written by [`delete`](super::node::DhtNode::delete) in place of
/// a native tombstone (the underlying DHT has no delete operation).
/// Preserved bit-exact for interop, per Design Notes §9.
pub const DELETED_SENTINEL: &str = "__DELETED__";

/// Maximum size of a single DHT value, enforced at write time (spec §6.3 /
/// Design Notes §9 "UDP framing limit").
pub const MAX_VALUE_BYTES: usize = 8 * 1024;

/// A DHT value as stored/retrieved. `Raw` is reserved for well-known scalar
/// keys like `cqkd_process_id`; every structured inter-component payload is
/// `Json`.
#[derive(Debug, Clone, PartialEq)]
pub enum DhtValue {
    Raw(Vec<u8>),
    Json(serde_json::Value),
}

impl DhtValue {
    pub fn json(value: impl Serialize) -> Result<Self> {
        Ok(DhtValue::Json(serde_json::to_value(value)?))
    }

    pub fn raw(s: impl Into<String>) -> Self {
        DhtValue::Raw(s.into().into_bytes())
    }

    pub fn as_str(&self) -> Option<String> {
        match self {
            DhtValue::Raw(bytes) => String::from_utf8(bytes.clone()).ok(),
            DhtValue::Json(serde_json::Value::String(s)) => Some(s.clone()),
            DhtValue::Json(v) => Some(v.to_string()),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            DhtValue::Json(v) => Ok(serde_json::from_value(v.clone())?),
            DhtValue::Raw(bytes) => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// True when this value is the delete sentinel; callers MUST treat a
    /// sentinel value as absent (spec §4.1 `get`).
    pub fn is_deleted_sentinel(&self) -> bool {
        matches!(self.as_str(), Some(s) if s == DELETED_SENTINEL)
    }

    /// Serialize to the wire representation used by the transport layer.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            DhtValue::Raw(bytes) => bytes.clone(),
            DhtValue::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
        }
    }

    /// Parse bytes off the wire: valid JSON decodes as `Json`, anything
    /// else is treated as a raw scalar (spec §4.1 `get`: "If the value
    /// parses as JSON, return the decoded form; else the raw bytes").
    pub fn from_wire(bytes: Vec<u8>) -> Self {
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(v) if v.is_object() || v.is_array() => DhtValue::Json(v),
            _ => DhtValue::Raw(bytes),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.to_wire().len()
    }

    /// Enforce the single-frame size bound at write time.
    pub fn check_frame_bound(&self) -> Result<()> {
        let size = self.byte_len();
        if size > MAX_VALUE_BYTES {
            return Err(CqkdError::ValueTooLarge {
                size,
                limit: MAX_VALUE_BYTES,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_sentinel_is_recognised_as_raw_or_json_string() {
        assert!(DhtValue::raw(DELETED_SENTINEL).is_deleted_sentinel());
        assert!(DhtValue::Json(serde_json::Value::String(DELETED_SENTINEL.into())).is_deleted_sentinel());
        assert!(!DhtValue::raw("anything-else").is_deleted_sentinel());
    }

    #[test]
    fn wire_round_trip_preserves_json_objects() {
        let value = DhtValue::json(serde_json::json!({"a": 1})).unwrap();
        let wire = value.to_wire();
        let back = DhtValue::from_wire(wire);
        assert_eq!(back, value);
    }

    #[test]
    fn oversized_value_is_rejected() {
        let big = DhtValue::raw("x".repeat(MAX_VALUE_BYTES + 1));
        assert!(big.check_frame_bound().is_err());
    }
}
