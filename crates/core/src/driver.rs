//! Transfer-driver interface
//!
//! The engine never touches a remote directly; everything flows through this
//! narrow interface. A driver owns two endpoints: the source tree being
//! backed up and the destination tree holding the dated artifacts.

use crate::checksum::ChecksumSet;
use anyhow::Result;

/// Which endpoint an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remote {
    Src,
    Dst,
}

/// One entry of a recursive listing
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// Slash-separated path relative to the endpoint root
    pub path: String,
    pub size: i64,
    /// Modification time in UTC epoch seconds
    pub mtime: Option<f64>,
    pub checksum: Option<ChecksumSet>,
    pub is_dir: bool,
}

/// Object-transfer driver consumed by the engine.
///
/// All paths are slash-separated and relative to the endpoint root. Workers
/// call into the driver concurrently; implementations must be thread-safe.
pub trait TransferDriver: Send + Sync {
    /// Recursive listing under `subdir` ("" for the whole endpoint),
    /// including directory entries
    fn list(&self, remote: Remote, subdir: &str) -> Result<Vec<RemoteEntry>>;

    /// Copy a source file to a destination real path, returning the metadata
    /// captured at transfer time
    fn copy_to(&self, src_apath: &str, dst_rpath: &str) -> Result<RemoteEntry>;

    /// Server-side copy between two destination real paths. Only called when
    /// `supports_copy_between` returns true.
    fn copy_between(&self, src_rpath: &str, dst_rpath: &str) -> Result<()>;

    /// Whether the destination can copy without round-tripping the payload
    fn supports_copy_between(&self) -> bool {
        false
    }

    /// Write a small payload (delete markers, references, empty-dir markers,
    /// sidecars) to a destination real path
    fn put_small(&self, dst_rpath: &str, bytes: &[u8]) -> Result<()>;

    /// Read a destination object in full
    fn get_small(&self, rpath: &str) -> Result<Vec<u8>>;

    /// Delete a destination object. Deleting an absent object is not an
    /// error; append-only reconciliation depends on idempotent deletes.
    fn delete(&self, rpath: &str) -> Result<()>;
}
