//! Run-level error taxonomy and exit-status mapping
//!
//! Per-action errors never short-circuit a run; they aggregate into the run
//! report and decide the exit status at the end. Only listing failures and
//! configuration refusals abort outright.

use std::time::Duration;
use thiserror::Error;

/// Fatal or refusal-class errors for a run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot list source: {0}")]
    SourceUnavailable(String),
    #[error("cannot reach destination: {0}")]
    DestinationUnavailable(String),
    #[error("destination already holds {rpath} with a different identity")]
    ConflictingArtifact { rpath: String },
    #[error("reference integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("pruning is disabled by configuration (set disable_prune = false to allow)")]
    PruneDisabled,
    #[error("refresh is disabled by configuration (set disable_refresh = false to allow)")]
    RefreshDisabled,
    #[error("run cancelled")]
    CancelRequested,
}

/// One failed action, reported in aggregate at end of run
#[derive(Debug, Clone)]
pub struct ActionFailure {
    pub phase: &'static str,
    pub apath: String,
    pub message: String,
}

impl ActionFailure {
    pub fn new(phase: &'static str, apath: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self {
            phase,
            apath: apath.into(),
            message: err.to_string(),
        }
    }
}

/// Aggregate outcome of a run
#[derive(Debug, Default)]
pub struct RunReport {
    pub uploaded: usize,
    pub referenced: usize,
    pub copied: usize,
    pub deleted: usize,
    pub pruned: usize,
    /// Actions skipped because an identical version already exists
    pub noops: usize,
    /// Entries whose hash comparison fell back to size
    pub missing_hash: usize,
    pub failures: Vec<ActionFailure>,
    /// Destination writes that later failed to commit to the index; refresh
    /// reconciles these
    pub inconsistencies: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn actions(&self) -> usize {
        self.uploaded + self.referenced + self.copied + self.deleted + self.pruned
    }

    /// Exit status from the worst category observed: index inconsistency
    /// outranks per-file failures; a clean run is zero
    pub fn exit_code(&self) -> i32 {
        if self.inconsistencies > 0 {
            4
        } else if !self.failures.is_empty() {
            3
        } else {
            0
        }
    }
}

/// Exit status for errors that abort a run before a report exists
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RunError>() {
        Some(RunError::SourceUnavailable(_)) | Some(RunError::DestinationUnavailable(_)) => 2,
        Some(RunError::PruneDisabled) | Some(RunError::RefreshDisabled) => 5,
        Some(RunError::ConflictingArtifact { .. })
        | Some(RunError::IntegrityViolation(_))
        | Some(RunError::CancelRequested) => 3,
        None => 1,
    }
}
