//! SessionContext — owned by Alice, namespaces one key-exchange run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::node_id::NodeId;
use super::node_info::RoleKind;

/// One basis, per GLOSSARY: `+` (rectilinear) or `x` (diagonal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Basis {
    Plus,
    Cross,
}

impl Basis {
    /// The two polarization angles (degrees) associated with this basis.
    pub fn angles(&self) -> (u16, u16) {
        match self {
            Basis::Plus => (0, 90),
            Basis::Cross => (45, 135),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Basis::Plus => '+',
            Basis::Cross => 'x',
        }
    }

    /// Basis implied by a polarization angle, per §4.12 QPM's
    /// `alice_base = '+' if alice_polarization in [0, 90] else 'x'`.
    pub fn from_polarization(angle: u16) -> Basis {
        match angle {
            0 | 90 => Basis::Plus,
            _ => Basis::Cross,
        }
    }
}

/// Per-session allocation and exchange state, owned by Alice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub lc: usize,
    pub lk: usize,
    pub alpha: usize,
    pub allocation: BTreeMap<RoleKind, Vec<NodeId>>,
    pub sorting_rule: Vec<usize>,
    pub alice_bases: Vec<Basis>,
    pub alice_bits: Vec<u8>,
    pub bob_bases: Vec<Basis>,
    pub bob_bits: Vec<u8>,
    pub valid_positions: Vec<usize>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, lc: usize, lk: usize, alpha: usize) -> Self {
        Self {
            session_id: session_id.into(),
            lc,
            lk,
            alpha,
            allocation: BTreeMap::new(),
            sorting_rule: Vec::new(),
            alice_bases: Vec::new(),
            alice_bits: Vec::new(),
            bob_bases: Vec::new(),
            bob_bits: Vec::new(),
            valid_positions: Vec::new(),
        }
    }

    /// True iff `sorting_rule` is a bijection on `[0, lk)` (spec §8 "Shuffle
    /// is a permutation").
    pub fn sorting_rule_is_permutation(&self) -> bool {
        if self.sorting_rule.len() != self.lk {
            return false;
        }
        let mut seen = vec![false; self.lk];
        for &idx in &self.sorting_rule {
            if idx >= self.lk || seen[idx] {
                return false;
            }
            seen[idx] = true;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_from_polarization_round_trips_for_defined_angles() {
        assert_eq!(Basis::from_polarization(0), Basis::Plus);
        assert_eq!(Basis::from_polarization(90), Basis::Plus);
        assert_eq!(Basis::from_polarization(45), Basis::Cross);
        assert_eq!(Basis::from_polarization(135), Basis::Cross);
    }

    #[test]
    fn sorting_rule_permutation_check() {
        let mut ctx = SessionContext::new("sid", 2, 5, 25);
        ctx.sorting_rule = vec![4, 3, 2, 1, 0];
        assert!(ctx.sorting_rule_is_permutation());

        ctx.sorting_rule = vec![0, 0, 1, 2, 3];
        assert!(!ctx.sorting_rule_is_permutation());

        ctx.sorting_rule = vec![0, 1, 2, 3];
        assert!(!ctx.sorting_rule_is_permutation());
    }
}
