//! Single-role-occupancy enforcement for worker nodes (spec §4.8).

pub mod lease;

pub use lease::RoleLeaseManager;
