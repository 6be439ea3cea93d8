//! Run-level configuration consumed by the engine
//!
//! The CLI owns parsing and validation of the user's config file; the engine
//! only sees this resolved form.

use anyhow::{bail, Result};

/// Comparison / rename-detection attribute. Size participates in every
/// comparison regardless; the attribute picks what else is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attrib {
    Hash,
    Mtime,
    Size,
    Disabled,
}

impl Attrib {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hash" => Ok(Attrib::Hash),
            "mtime" => Ok(Attrib::Mtime),
            "size" => Ok(Attrib::Size),
            "false" | "none" | "off" => Ok(Attrib::Disabled),
            other => bail!("unrecognized attribute {other:?} (expected hash, mtime, size, or false)"),
        }
    }

    pub fn enabled(&self) -> bool {
        *self != Attrib::Disabled
    }

    /// Whether listings need mtimes for this attribute
    pub fn needs_mtime(&self) -> bool {
        *self == Attrib::Mtime
    }

    /// Whether listings need checksums for this attribute
    pub fn needs_hash(&self) -> bool {
        *self == Attrib::Hash
    }
}

/// Resolved configuration for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Stable identifier; keys the cache database and the run lease
    pub config_id: String,
    /// Source-to-source comparison attribute
    pub compare: Attrib,
    /// Source-to-destination comparison (used for rows whose metadata came
    /// from a destination listing)
    pub dst_compare: Attrib,
    /// Rename tracking, source-to-source
    pub renames: Attrib,
    /// Rename tracking against destination-derived rows
    pub dst_renames: Attrib,
    /// Files at or below this size are never rename-tracked
    pub min_rename_size: i64,
    /// Moves of files larger than this may use server-side copy
    pub min_ref_size: i64,
    pub server_side_copy_moves: bool,
    pub empty_dir_markers: bool,
    /// Allowed mtime drift in seconds before two times count as different
    pub mtime_tolerance: f64,
    pub upload_workers: usize,
    pub reference_workers: usize,
    pub delete_workers: usize,
    /// Bound on each phase's in-flight queue
    pub queue_depth: usize,
    pub disable_prune: bool,
    pub disable_refresh: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            config_id: "default".to_string(),
            compare: Attrib::Mtime,
            dst_compare: Attrib::Size,
            renames: Attrib::Mtime,
            dst_renames: Attrib::Disabled,
            min_rename_size: 0,
            min_ref_size: 0,
            server_side_copy_moves: false,
            empty_dir_markers: false,
            mtime_tolerance: 1.1,
            upload_workers: 4,
            reference_workers: 2,
            delete_workers: 2,
            queue_depth: 64,
            disable_prune: false,
            disable_refresh: false,
        }
    }
}
