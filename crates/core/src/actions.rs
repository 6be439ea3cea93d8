//! Action-dump line format
//!
//! One JSON object per line, shared by `--dump` output, snapshot sidecars,
//! and `import`. The kinds are UPLOAD, MOVE_BY_REFERENCE, MOVE_BY_COPY,
//! DELETE, PRUNE, and COMMENT; a line's kind is decided by which keys it
//! carries, so a single permissive struct covers them all.

use crate::checksum::ChecksumSet;
use crate::record::{ArtifactKind, ArtifactRecord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Kind of an action-dump line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Upload,
    MoveByReference,
    MoveByCopy,
    Delete,
    Prune,
    Comment,
}

/// One line of the action-dump / sidecar format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionLine {
    #[serde(rename = "_V", skip_serializing_if = "Option::is_none")]
    pub v: Option<u32>,
    #[serde(rename = "_action", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isref: Option<bool>,
    /// For MOVE_BY_REFERENCE: the real path of the reference artifact itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_rpath: Option<String>,
    /// For MOVE_BY_COPY: the real path the copy was made from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_rpath: Option<String>,
    /// For moves: the apparent path the content previously lived at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dstinfo: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl ActionLine {
    /// Classify this line by the keys it carries
    pub fn kind(&self) -> ActionKind {
        match self.action.as_deref() {
            Some("prune") => ActionKind::Prune,
            Some("comment") => ActionKind::Comment,
            _ => {
                if self.isref == Some(true) {
                    ActionKind::MoveByReference
                } else if self.source_rpath.is_some() {
                    ActionKind::MoveByCopy
                } else if self.size == Some(-1) {
                    ActionKind::Delete
                } else {
                    ActionKind::Upload
                }
            }
        }
    }

    /// Line recording a committed artifact (upload, move, or delete marker)
    pub fn from_record(rec: &ArtifactRecord, original: Option<&str>) -> Self {
        let mut line = ActionLine {
            apath: Some(rec.apath.clone()),
            timestamp: Some(rec.timestamp),
            size: Some(rec.size),
            mtime: rec.mtime,
            checksum: rec.checksum.clone(),
            dstinfo: Some(rec.dstinfo),
            original: original.map(str::to_string),
            ..Default::default()
        };
        match rec.kind {
            ArtifactKind::Reference => {
                // The wire format names the referent `rpath` and the
                // reference artifact itself `ref_rpath`
                line.rpath = rec.referent.clone();
                line.ref_rpath = Some(rec.rpath.clone());
                line.isref = Some(true);
            }
            _ => {
                line.rpath = Some(rec.rpath.clone());
                line.isref = Some(false);
            }
        }
        line
    }

    /// PRUNE line for a removed real path
    pub fn prune(rpath: &str, size: Option<i64>) -> Self {
        ActionLine {
            v: Some(1),
            action: Some("prune".to_string()),
            rpath: Some(rpath.to_string()),
            size,
            ..Default::default()
        }
    }

    /// COMMENT line, ignored on read
    pub fn comment(msg: &str) -> Self {
        ActionLine {
            v: Some(1),
            action: Some("comment".to_string()),
            msg: Some(msg.to_string()),
            ..Default::default()
        }
    }

    /// Rebuild the artifact record a non-prune, non-comment line describes
    pub fn to_record(&self) -> Result<ArtifactRecord> {
        let apath = self.apath.clone().context("action line missing apath")?;
        let timestamp = self.timestamp.context("action line missing timestamp")?;
        let size = self.size.unwrap_or(0);

        let (rpath, kind, referent) = if self.isref == Some(true) {
            let own = self
                .ref_rpath
                .clone()
                .context("reference line missing ref_rpath")?;
            (own, ArtifactKind::Reference, self.rpath.clone())
        } else {
            let own = self.rpath.clone().context("action line missing rpath")?;
            let kind = if size < 0 {
                ArtifactKind::DeleteMarker
            } else if crate::record::basename(&apath) == crate::naming::DFB_EMPTY {
                ArtifactKind::EmptyDirMarker
            } else {
                ArtifactKind::Regular
            };
            (own, kind, None)
        };

        Ok(ArtifactRecord {
            apath,
            rpath,
            timestamp,
            kind,
            size,
            mtime: self.mtime,
            checksum: self.checksum.clone(),
            referent,
            dstinfo: self.dstinfo.unwrap_or(false),
            pending_prune: false,
        })
    }

    /// Compact single-line JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}
