//! Artifact records: the authoritative unit of the catalog

use crate::checksum::ChecksumSet;
use crate::naming::{Flag, DFB_EMPTY};
use serde::{Deserialize, Serialize};

/// What an artifact at the destination represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// A backed-up file payload
    Regular,
    /// The logical path is absent from this timestamp forward
    DeleteMarker,
    /// A rename recorded without data transfer; payload names the referent
    Reference,
    /// Zero-byte leaf preserving an otherwise empty directory
    EmptyDirMarker,
}

/// One row of the catalog: a single artifact version at the destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Logical path as the user sees it
    pub apath: String,
    /// On-destination name; unique across the catalog
    pub rpath: String,
    /// UTC seconds of the run that produced this artifact
    pub timestamp: i64,
    pub kind: ArtifactKind,
    /// Bytes; -1 for delete markers; for references the size of the referent
    pub size: i64,
    /// Source mtime in UTC seconds at capture time
    pub mtime: Option<f64>,
    pub checksum: Option<ChecksumSet>,
    /// For references: the real path this version points at (cached from the
    /// artifact payload)
    pub referent: Option<String>,
    /// Metadata came from the destination listing, not the source
    pub dstinfo: bool,
    /// Annotated by the prune executor before destination deletes go out
    #[serde(default)]
    pub pending_prune: bool,
}

impl ArtifactRecord {
    pub fn new(apath: &str, rpath: &str, timestamp: i64, kind: ArtifactKind) -> Self {
        Self {
            apath: apath.to_string(),
            rpath: rpath.to_string(),
            timestamp,
            kind,
            size: if kind == ArtifactKind::DeleteMarker { -1 } else { 0 },
            mtime: None,
            checksum: None,
            referent: None,
            dstinfo: false,
            pending_prune: false,
        }
    }

    /// The flag this record's real path carries
    pub fn flag(&self) -> Flag {
        match self.kind {
            ArtifactKind::Reference => Flag::Reference,
            ArtifactKind::DeleteMarker => Flag::Delete,
            _ => Flag::None,
        }
    }

    /// Whether the logical path exists when this is its latest version
    pub fn exists(&self) -> bool {
        self.kind != ArtifactKind::DeleteMarker
    }

    /// Whether this record is the synthetic empty-directory leaf
    pub fn is_empty_marker(&self) -> bool {
        self.kind == ArtifactKind::EmptyDirMarker
            || basename(&self.apath) == DFB_EMPTY
    }

    /// Serialize for the index store
    pub fn serialize(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the index store
    pub fn deserialize(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Final path segment of a slash-separated path
pub fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Parent of a slash-separated path; empty string at the root
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}
