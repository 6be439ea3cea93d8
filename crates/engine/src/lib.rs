//! Run orchestration for dfb
//!
//! This crate provides:
//! - The backup planner and executor (diff, rename tracking, phased actions)
//! - The prune executor (annotate, delete, commit)
//! - Refresh and import (index reconstruction from the destination)
//! - Restore (materialize a point-in-time state)
//! - Per-phase worker pools and the run-level error taxonomy

pub mod backup;
pub mod error;
pub mod prune;
pub mod refresh;
pub mod restore;
pub mod settings;
pub mod workers;

// Re-exports
pub use backup::{BackupOutcome, BackupPlan, BackupRun, SourceEntry};
pub use error::{exit_code_for, ActionFailure, RunError, RunReport};
pub use prune::PruneRun;
pub use refresh::{import_files, refresh, RefreshReport};
pub use restore::restore;
pub use settings::{Attrib, RunConfig};
pub use workers::{phase_map, CancelFlag};

/// Result type for engine operations
pub type Result<T> = anyhow::Result<T>;
