//! Persistent artifact catalog using sled
//!
//! The sled tree is keyed by real path and holds bincode-encoded records; the
//! secondary maps (apparent path → timestamp → real path, plus the reverse
//! reference adjacency) are rebuilt at open. Mutations go to sled first and
//! flush per commit, so readers in other processes only ever observe
//! fully-committed rows.

use anyhow::{bail, Context, Result};
use dfb_core::{ArtifactKind, ArtifactRecord};
use parking_lot::RwLock;
use sled::Db;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

#[derive(Default)]
struct Maps {
    by_rpath: HashMap<String, ArtifactRecord>,
    by_apath: BTreeMap<String, BTreeMap<i64, String>>,
    /// referent rpath → reference rows pointing at it
    referenced_by: HashMap<String, BTreeSet<String>>,
}

impl Maps {
    fn index(&mut self, rec: ArtifactRecord) {
        self.by_apath
            .entry(rec.apath.clone())
            .or_default()
            .insert(rec.timestamp, rec.rpath.clone());
        if let Some(referent) = &rec.referent {
            self.referenced_by
                .entry(referent.clone())
                .or_default()
                .insert(rec.rpath.clone());
        }
        self.by_rpath.insert(rec.rpath.clone(), rec);
    }

    fn unindex(&mut self, rpath: &str) -> Option<ArtifactRecord> {
        let rec = self.by_rpath.remove(rpath)?;
        if let Some(versions) = self.by_apath.get_mut(&rec.apath) {
            versions.remove(&rec.timestamp);
            if versions.is_empty() {
                self.by_apath.remove(&rec.apath);
            }
        }
        if let Some(referent) = &rec.referent {
            if let Some(set) = self.referenced_by.get_mut(referent) {
                set.remove(rpath);
                if set.is_empty() {
                    self.referenced_by.remove(referent);
                }
            }
        }
        Some(rec)
    }
}

/// Catalog of every artifact version observed at the destination
pub struct IndexStore {
    db: Db,
    maps: RwLock<Maps>,
}

impl IndexStore {
    /// Open or create the catalog at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("failed to open index at {}", path.display()))?;

        let mut maps = Maps::default();
        for item in db.iter() {
            let (_, value) = item?;
            let rec = ArtifactRecord::deserialize(&value)?;
            maps.index(rec);
        }

        Ok(Self {
            db,
            maps: RwLock::new(maps),
        })
    }

    /// Insert a record, committing it durably before updating the maps.
    ///
    /// Fails when the real path already exists with a different identity
    /// (apparent path, timestamp, kind, or referent), or when another real
    /// path already occupies the same (apath, timestamp) slot. A re-insert
    /// of an identical identity requires `replace`.
    pub fn insert(&self, rec: &ArtifactRecord, replace: bool) -> Result<()> {
        {
            let maps = self.maps.read();
            if let Some(existing) = maps.by_rpath.get(&rec.rpath) {
                if existing.kind != rec.kind
                    || existing.referent != rec.referent
                    || existing.apath != rec.apath
                    || existing.timestamp != rec.timestamp
                {
                    bail!(
                        "artifact {:?} already indexed with different identity",
                        rec.rpath
                    );
                }
                if !replace {
                    bail!("artifact {:?} already indexed", rec.rpath);
                }
            }
            if let Some(other) = maps
                .by_apath
                .get(&rec.apath)
                .and_then(|v| v.get(&rec.timestamp))
            {
                if other != &rec.rpath {
                    bail!(
                        "version ({:?}, {}) already held by {:?}",
                        rec.apath,
                        rec.timestamp,
                        other
                    );
                }
            }
        }

        self.db.insert(rec.rpath.as_bytes(), rec.serialize()?)?;
        self.db.flush()?;

        let mut maps = self.maps.write();
        maps.unindex(&rec.rpath);
        maps.index(rec.clone());
        Ok(())
    }

    /// Update optional metadata on an existing row without advancing its
    /// timestamp or changing its identity
    pub fn enrich(&self, rpath: &str, f: impl FnOnce(&mut ArtifactRecord)) -> Result<()> {
        let mut rec = self
            .get(rpath)
            .with_context(|| format!("cannot enrich unknown artifact {rpath:?}"))?;
        let identity = (rec.apath.clone(), rec.timestamp, rec.kind);
        f(&mut rec);
        if (rec.apath.clone(), rec.timestamp, rec.kind) != identity {
            bail!("enrich must not change artifact identity for {rpath:?}");
        }

        self.db.insert(rpath.as_bytes(), rec.serialize()?)?;
        self.db.flush()?;

        let mut maps = self.maps.write();
        maps.unindex(rpath);
        maps.index(rec);
        Ok(())
    }

    /// Annotate rows as pending prune in a single flush
    pub fn mark_pending_prune(&self, rpaths: &[String]) -> Result<()> {
        let mut updated = Vec::with_capacity(rpaths.len());
        {
            let maps = self.maps.read();
            for rpath in rpaths {
                let mut rec = maps
                    .by_rpath
                    .get(rpath)
                    .cloned()
                    .with_context(|| format!("cannot mark unknown artifact {rpath:?}"))?;
                rec.pending_prune = true;
                updated.push(rec);
            }
        }
        for rec in &updated {
            self.db.insert(rec.rpath.as_bytes(), rec.serialize()?)?;
        }
        self.db.flush()?;

        let mut maps = self.maps.write();
        for rec in updated {
            maps.unindex(&rec.rpath);
            maps.index(rec);
        }
        Ok(())
    }

    /// Remove a row, returning it
    pub fn remove(&self, rpath: &str) -> Result<Option<ArtifactRecord>> {
        self.db.remove(rpath.as_bytes())?;
        self.db.flush()?;
        Ok(self.maps.write().unindex(rpath))
    }

    /// Drop every row, keeping only the schema
    pub fn reset(&self) -> Result<()> {
        self.db.clear()?;
        self.db.flush()?;
        *self.maps.write() = Maps::default();
        Ok(())
    }

    pub fn get(&self, rpath: &str) -> Option<ArtifactRecord> {
        self.maps.read().by_rpath.get(rpath).cloned()
    }

    pub fn contains_version(&self, apath: &str, timestamp: i64) -> bool {
        self.maps
            .read()
            .by_apath
            .get(apath)
            .map_or(false, |v| v.contains_key(&timestamp))
    }

    pub fn len(&self) -> usize {
        self.maps.read().by_rpath.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All versions of one apparent path, oldest first
    pub fn versions(&self, apath: &str) -> Vec<ArtifactRecord> {
        let maps = self.maps.read();
        maps.by_apath
            .get(apath)
            .map(|v| {
                v.values()
                    .filter_map(|rpath| maps.by_rpath.get(rpath).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Apparent paths strictly under `subpath` ("" for all), sorted
    pub fn apaths_under(&self, subpath: &str) -> Vec<String> {
        let maps = self.maps.read();
        if subpath.is_empty() {
            return maps.by_apath.keys().cloned().collect();
        }
        let prefix = format!("{}/", subpath.trim_end_matches('/'));
        maps.by_apath
            .range(prefix.clone()..)
            .take_while(|(apath, _)| apath.starts_with(&prefix))
            .map(|(apath, _)| apath.clone())
            .collect()
    }

    /// Every row in the catalog, ordered by apparent path then timestamp
    pub fn all_records(&self) -> Vec<ArtifactRecord> {
        let maps = self.maps.read();
        maps.by_apath
            .values()
            .flat_map(|v| v.values())
            .filter_map(|rpath| maps.by_rpath.get(rpath).cloned())
            .collect()
    }

    /// Reference rows that point directly at `rpath`
    pub fn direct_referencers(&self, rpath: &str) -> Vec<String> {
        self.maps
            .read()
            .referenced_by
            .get(rpath)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of reference rows whose chains terminate at this row
    pub fn ref_count(&self, rpath: &str) -> usize {
        let maps = self.maps.read();
        let mut seen = BTreeSet::new();
        let mut stack = vec![rpath.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(referrers) = maps.referenced_by.get(&current) {
                for r in referrers {
                    if seen.insert(r.clone()) {
                        stack.push(r.clone());
                    }
                }
            }
        }
        seen.len()
    }

    /// All reference rows (used by the prune planner for subdir protection)
    pub fn reference_rows(&self) -> Vec<ArtifactRecord> {
        self.maps
            .read()
            .by_rpath
            .values()
            .filter(|r| r.kind == ArtifactKind::Reference)
            .cloned()
            .collect()
    }
}
