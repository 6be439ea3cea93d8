//! Core codecs and data model for dfb
//!
//! This crate provides:
//! - Timestamp codec (flexible user expressions, fixed UTC stamp)
//! - Naming codec (apparent path ⇄ real path)
//! - Reference artifact payload codec
//! - Artifact records and the action-dump line format
//! - The transfer-driver interface and a local-filesystem driver

pub mod actions;
pub mod checksum;
pub mod driver;
pub mod localfs;
pub mod naming;
pub mod record;
pub mod reference;
pub mod timestamps;

// Re-exports
pub use actions::ActionLine;
pub use checksum::ChecksumSet;
pub use driver::{Remote, RemoteEntry, TransferDriver};
pub use localfs::LocalDriver;
pub use naming::{apath_to_rpath, rpath_to_apath, smart_splitext, Flag, DFB_EMPTY};
pub use record::{ArtifactKind, ArtifactRecord};
pub use reference::{decode_reference, encode_reference};
pub use timestamps::{fmt_dt14, parse_dt14, parse_time_expr};

/// Result type for core operations
pub type Result<T> = anyhow::Result<T>;
