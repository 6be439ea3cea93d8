//! Point-in-time resolver
//!
//! Answers "what is the logical state at time t over subpath p" and its
//! companions (`versions`, `tree`, `timestamps`, `stats`) as pure queries
//! over the catalog. All comparisons use integer UTC seconds; re-queries
//! over an unchanging index return identical results.

use crate::store::IndexStore;
use dfb_core::record::parent;
use dfb_core::{ArtifactKind, ArtifactRecord};
use std::collections::BTreeSet;

/// Hop bound for reference chains; anything longer is treated as broken
pub const MAX_REF_HOPS: usize = 64;

/// Parameters for a state query
#[derive(Debug, Clone, Default)]
pub struct StateQuery {
    /// Upper bound (inclusive); None means the latest state
    pub at: Option<i64>,
    /// Lower bound (inclusive) on considered versions
    pub after: Option<i64>,
    /// Restrict to apparent paths strictly under this directory
    pub subpath: String,
    /// Include paths whose latest version is a delete marker
    pub include_deleted: bool,
    /// Only report deleted paths
    pub only_deleted: bool,
    /// Resolve reference rows to their terminal referent
    pub deref: bool,
}

/// One logical path in a state listing
#[derive(Debug, Clone)]
pub struct StateEntry {
    pub rec: ArtifactRecord,
    /// Number of versions within the query window
    pub versions: usize,
    /// Sum of non-negative sizes across those versions
    pub total_size: i64,
    /// Terminal referent when `deref` was requested and `rec` is a reference
    pub target: Option<ArtifactRecord>,
    /// The reference chain could not be resolved
    pub broken: bool,
}

/// Result of following a reference chain
#[derive(Debug, Clone)]
pub enum ResolvedRef {
    /// The terminal regular artifact
    Terminal(ArtifactRecord),
    /// The chain is unresolvable; the path reads as absent
    Broken(String),
}

/// Grouped listing of one directory level (or a full subtree)
#[derive(Debug, Clone)]
pub struct TreeListing {
    pub dirs: Vec<String>,
    pub files: Vec<StateEntry>,
}

/// Aggregate catalog statistics
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub current_files: usize,
    pub current_size: i64,
    pub total_rows: usize,
    pub total_size: i64,
}

impl IndexStore {
    /// Follow a reference chain to its terminal regular artifact
    pub fn resolve(&self, rec: &ArtifactRecord) -> ResolvedRef {
        let mut current = rec.clone();
        for _ in 0..MAX_REF_HOPS {
            match current.kind {
                ArtifactKind::Regular | ArtifactKind::EmptyDirMarker => {
                    return ResolvedRef::Terminal(current)
                }
                ArtifactKind::DeleteMarker => {
                    return ResolvedRef::Broken(format!(
                        "chain from {:?} ends at delete marker {:?}",
                        rec.rpath, current.rpath
                    ))
                }
                ArtifactKind::Reference => {
                    let referent = match &current.referent {
                        Some(r) => r.clone(),
                        None => {
                            return ResolvedRef::Broken(format!(
                                "reference {:?} has no referent recorded",
                                current.rpath
                            ))
                        }
                    };
                    match self.get(&referent) {
                        Some(next) => current = next,
                        None => {
                            return ResolvedRef::Broken(format!(
                                "reference {:?} points at missing {:?}",
                                current.rpath, referent
                            ))
                        }
                    }
                }
            }
        }
        ResolvedRef::Broken(format!(
            "chain from {:?} exceeds {MAX_REF_HOPS} hops",
            rec.rpath
        ))
    }

    /// Latest version of `apath` within the window, if any
    pub fn latest_version(
        &self,
        apath: &str,
        at: Option<i64>,
        after: Option<i64>,
    ) -> Option<ArtifactRecord> {
        let versions = self.versions(apath);
        versions
            .into_iter()
            .filter(|r| at.map_or(true, |t| r.timestamp <= t))
            .filter(|r| after.map_or(true, |t| r.timestamp >= t))
            .last()
    }

    /// The logical state over a subpath: one entry per apparent path whose
    /// greatest in-window version decides existence
    pub fn state_at(&self, q: &StateQuery) -> Vec<StateEntry> {
        let mut out = Vec::new();
        for apath in self.apaths_under(&q.subpath) {
            let versions: Vec<ArtifactRecord> = self
                .versions(&apath)
                .into_iter()
                .filter(|r| q.at.map_or(true, |t| r.timestamp <= t))
                .filter(|r| q.after.map_or(true, |t| r.timestamp >= t))
                .collect();
            let Some(rec) = versions.last().cloned() else {
                continue;
            };

            let deleted = !rec.exists();
            if deleted && !(q.include_deleted || q.only_deleted) {
                continue;
            }
            if q.only_deleted && !deleted {
                continue;
            }

            let total_size = versions.iter().map(|r| r.size.max(0)).sum();
            let mut entry = StateEntry {
                versions: versions.len(),
                total_size,
                rec,
                target: None,
                broken: false,
            };

            if q.deref && entry.rec.kind == ArtifactKind::Reference {
                match self.resolve(&entry.rec) {
                    ResolvedRef::Terminal(target) => entry.target = Some(target),
                    ResolvedRef::Broken(reason) => {
                        tracing::warn!("{reason}");
                        entry.broken = true;
                        if !q.include_deleted {
                            continue;
                        }
                    }
                }
            }
            out.push(entry);
        }
        out
    }

    /// Distinct run timestamps over a subpath, ascending
    pub fn run_timestamps(
        &self,
        subpath: &str,
        after: Option<i64>,
        before: Option<i64>,
    ) -> Vec<i64> {
        let mut set = BTreeSet::new();
        for apath in self.apaths_under(subpath) {
            for rec in self.versions(&apath) {
                if after.map_or(true, |t| rec.timestamp >= t)
                    && before.map_or(true, |t| rec.timestamp <= t)
                {
                    set.insert(rec.timestamp);
                }
            }
        }
        set.into_iter().collect()
    }

    /// Grouped listing at one directory level, or the full subtree when
    /// `recursive` is set
    pub fn tree(&self, q: &StateQuery, recursive: bool) -> TreeListing {
        let sub = q.subpath.trim_end_matches('/');
        let entries = self.state_at(q);

        let mut dirs: BTreeSet<String> = BTreeSet::new();
        let mut files = Vec::new();

        for entry in entries {
            let rel = match sub.is_empty() {
                true => entry.rec.apath.clone(),
                false => entry.rec.apath[sub.len() + 1..].to_string(),
            };

            match rel.split_once('/') {
                None => files.push(entry),
                Some((first, _)) => {
                    if recursive {
                        // Record every intermediate directory
                        let mut dir = parent(&rel).to_string();
                        while !dir.is_empty() {
                            dirs.insert(join(sub, &dir));
                            dir = parent(&dir).to_string();
                        }
                        files.push(entry);
                    } else {
                        dirs.insert(join(sub, first));
                    }
                }
            }
        }

        TreeListing {
            dirs: dirs.into_iter().collect(),
            files,
        }
    }

    /// Aggregate statistics: the current state plus catalog totals
    pub fn stats(&self, at: Option<i64>) -> IndexStats {
        let mut stats = IndexStats::default();
        let current = self.state_at(&StateQuery {
            at,
            ..Default::default()
        });
        stats.current_files = current.len();
        stats.current_size = current
            .iter()
            .filter(|e| e.rec.kind == ArtifactKind::Regular)
            .map(|e| e.rec.size.max(0))
            .sum();

        for rec in self.all_records() {
            stats.total_rows += 1;
            if rec.kind == ArtifactKind::Regular {
                stats.total_size += rec.size.max(0);
            }
        }
        stats
    }
}

fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        rel.to_string()
    } else {
        format!("{base}/{rel}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexStore;
    use tempfile::TempDir;

    fn rec(apath: &str, ts: i64, kind: ArtifactKind, size: i64) -> ArtifactRecord {
        let flag = match kind {
            ArtifactKind::Reference => "R",
            ArtifactKind::DeleteMarker => "D",
            _ => "",
        };
        let mut r = ArtifactRecord::new(
            apath,
            &format!("{apath}.{}{flag}", dfb_core::fmt_dt14(ts)),
            ts,
            kind,
        );
        if kind != ArtifactKind::DeleteMarker {
            r.size = size;
        }
        r
    }

    fn scenario_store(tmp: &TempDir) -> IndexStore {
        // foo: created at 1, modified at 2, deleted at 3
        let store = IndexStore::open(&tmp.path().join("idx.db")).unwrap();
        store
            .insert(&rec("foo", 1, ArtifactKind::Regular, 1), false)
            .unwrap();
        store
            .insert(&rec("foo", 2, ArtifactKind::Regular, 2), false)
            .unwrap();
        store
            .insert(&rec("foo", 3, ArtifactKind::DeleteMarker, -1), false)
            .unwrap();
        store
    }

    #[test]
    fn test_state_at_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let store = scenario_store(&tmp);

        let at = |t| StateQuery {
            at: Some(t),
            ..Default::default()
        };

        let s1 = store.state_at(&at(1));
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].rec.size, 1);

        let s2 = store.state_at(&at(2));
        assert_eq!(s2[0].rec.size, 2);
        assert_eq!(s2[0].versions, 2);
        assert_eq!(s2[0].total_size, 3);

        // Deleted at 3
        assert!(store.state_at(&at(3)).is_empty());

        // But visible when deletes are requested
        let with_del = store.state_at(&StateQuery {
            at: Some(3),
            include_deleted: true,
            ..Default::default()
        });
        assert_eq!(with_del.len(), 1);
        assert_eq!(with_del[0].rec.kind, ArtifactKind::DeleteMarker);

        // Before any version: nothing
        assert!(store.state_at(&at(0)).is_empty());
    }

    #[test]
    fn test_state_matches_last_version_property() {
        let tmp = TempDir::new().unwrap();
        let store = scenario_store(&tmp);

        let versions = store.versions("foo");
        let last = versions.last().unwrap();
        let state = store.state_at(&StateQuery {
            at: Some(last.timestamp),
            include_deleted: true,
            ..Default::default()
        });
        assert_eq!(&state[0].rec, last);
    }

    #[test]
    fn test_deref_chain() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(&tmp.path().join("idx.db")).unwrap();

        let a = rec("a.bin", 1, ArtifactKind::Regular, 100);
        store.insert(&a, false).unwrap();
        let mut b = rec("b.bin", 2, ArtifactKind::Reference, 100);
        b.referent = Some(a.rpath.clone());
        store.insert(&b, false).unwrap();
        let mut c = rec("c.bin", 3, ArtifactKind::Reference, 100);
        c.referent = Some(b.rpath.clone());
        store.insert(&c, false).unwrap();

        match store.resolve(&c) {
            ResolvedRef::Terminal(t) => assert_eq!(t.rpath, a.rpath),
            ResolvedRef::Broken(r) => panic!("unexpected broken chain: {r}"),
        }

        // Break the chain and the path reads as absent
        store.remove(&a.rpath).unwrap();
        assert!(matches!(store.resolve(&c), ResolvedRef::Broken(_)));

        let state = store.state_at(&StateQuery {
            subpath: String::new(),
            deref: true,
            ..Default::default()
        });
        assert!(state.iter().all(|e| e.rec.apath != "c.bin"));
    }

    #[test]
    fn test_resolve_detects_cycles() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(&tmp.path().join("idx.db")).unwrap();

        let mut y = rec("y.bin", 2, ArtifactKind::Reference, 1);
        let mut x = rec("x.bin", 1, ArtifactKind::Reference, 1);
        x.referent = Some(y.rpath.clone());
        y.referent = Some(x.rpath.clone());
        store.insert(&x, false).unwrap();
        store.insert(&y, false).unwrap();

        assert!(matches!(store.resolve(&x), ResolvedRef::Broken(_)));
    }

    #[test]
    fn test_run_timestamps() {
        let tmp = TempDir::new().unwrap();
        let store = scenario_store(&tmp);
        assert_eq!(store.run_timestamps("", None, None), vec![1, 2, 3]);
        assert_eq!(store.run_timestamps("", Some(2), None), vec![2, 3]);
        assert_eq!(store.run_timestamps("", None, Some(2)), vec![1, 2]);
    }

    #[test]
    fn test_tree_one_level() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(&tmp.path().join("idx.db")).unwrap();
        for apath in ["top.txt", "a/one.txt", "a/b/two.txt", "c/three.txt"] {
            store
                .insert(&rec(apath, 1, ArtifactKind::Regular, 1), false)
                .unwrap();
        }

        let listing = store.tree(&StateQuery::default(), false);
        assert_eq!(listing.dirs, vec!["a", "c"]);
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].rec.apath, "top.txt");

        let sub = store.tree(
            &StateQuery {
                subpath: "a".to_string(),
                ..Default::default()
            },
            false,
        );
        assert_eq!(sub.dirs, vec!["a/b"]);
        assert_eq!(sub.files[0].rec.apath, "a/one.txt");

        let rec_all = store.tree(&StateQuery::default(), true);
        assert_eq!(rec_all.files.len(), 4);
        assert_eq!(rec_all.dirs, vec!["a", "a/b", "c"]);
    }

    #[test]
    fn test_stats() {
        let tmp = TempDir::new().unwrap();
        let store = scenario_store(&tmp);
        let stats = store.stats(Some(2));
        assert_eq!(stats.current_files, 1);
        assert_eq!(stats.current_size, 2);
        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.total_size, 3);
    }

    #[test]
    fn test_queries_are_stable() {
        let tmp = TempDir::new().unwrap();
        let store = scenario_store(&tmp);
        let q = StateQuery {
            at: Some(2),
            ..Default::default()
        };
        let a = store.state_at(&q);
        let b = store.state_at(&q);
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].rec, b[0].rec);
    }
}
