//! Local index and query engine for dfb
//!
//! This crate provides:
//! - The persistent artifact catalog (sled-backed, in-memory secondary maps)
//! - The point-in-time resolver (`state_at`, `versions`, `tree`, ...)
//! - The prune planner (retention with reference and marker protection)
//! - Snapshot sidecar writing and reading

pub mod prune;
pub mod query;
pub mod sidecar;
pub mod store;

// Re-exports
pub use prune::{plan_prune, plan_rpaths, PrunePlan};
pub use query::{ResolvedRef, StateEntry, StateQuery, TreeListing};
pub use sidecar::{push_snapshots, read_remote_sidecars, SidecarKind, SidecarWriter};
pub use store::IndexStore;

/// Result type for index operations
pub type Result<T> = anyhow::Result<T>;
