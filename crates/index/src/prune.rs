//! Prune planner
//!
//! Computes which real paths can be deleted while preserving restorability
//! across every retained timestamp. Pruning is more subtle than it first
//! looks: retained references protect their referent chains, and a delete
//! marker may only go when everything it hides is going too.

use crate::query::MAX_REF_HOPS;
use crate::store::IndexStore;
use anyhow::{bail, Result};
use dfb_core::{ArtifactKind, ArtifactRecord};
use std::collections::{BTreeSet, HashSet};

/// Real paths slated for deletion, with sizes for reporting
#[derive(Debug, Clone, Default)]
pub struct PrunePlan {
    pub rpaths: Vec<(String, i64)>,
}

impl PrunePlan {
    pub fn is_empty(&self) -> bool {
        self.rpaths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rpaths.len()
    }

    /// Total payload bytes being freed (markers and references excluded)
    pub fn freed_bytes(&self) -> i64 {
        self.rpaths.iter().map(|(_, s)| (*s).max(0)).sum()
    }
}

/// Plan a prune at `cutoff`, keeping `keep` additional versions older than
/// each path's anchor (negative values shift forward instead). `subdir`
/// limits deletion to one directory; protection analysis still spans the
/// whole catalog so references into the subdir from outside hold their
/// referents down.
pub fn plan_prune(store: &IndexStore, cutoff: i64, keep: i64, subdir: &str) -> PrunePlan {
    let subdir = subdir.trim_end_matches('/').trim_start_matches("./");

    // Step 1: per path, bisect at the cutoff and split into the kept tail
    // and the deletion-candidate head. The newest row at or before the
    // cutoff is the anchor and always lands in the tail.
    let mut protected: HashSet<String> = HashSet::new();
    let mut del_groups: Vec<Vec<ArtifactRecord>> = Vec::new();

    for apath in store.apaths_under(subdir) {
        let group = store.versions(&apath);
        let n = group.len() as i64;

        let mut iwhen = group.partition_point(|r| r.timestamp <= cutoff) as i64;
        iwhen -= keep;

        let icut = if iwhen >= n && group.last().map_or(false, |r| r.size < 0) {
            // The whole history predates the window and ends deleted; every
            // row is a candidate, including the final marker
            n
        } else {
            iwhen.saturating_sub(1).clamp(0, n - 1)
        } as usize;

        for row in &group[icut.min(group.len())..] {
            if row.kind == ArtifactKind::Reference {
                protect_chain(store, row, &mut protected);
            }
        }
        del_groups.push(group[..icut.min(group.len())].to_vec());
    }

    // References from outside the subdir may point into it; their chains are
    // not deletion candidates here, so they protect unconditionally.
    if !subdir.is_empty() {
        let prefix = format!("{subdir}/");
        for row in store.reference_rows() {
            if !row.apath.starts_with(&prefix) {
                protect_chain(store, &row, &mut protected);
            }
        }
    }

    // Step 2: walk each candidate group oldest-first. Protected rows and
    // delete markers survive the first pass; markers then only stay when
    // they are the newest survivor (anything else they hid is gone).
    let mut del: BTreeSet<(String, i64)> = BTreeSet::new();
    for group in del_groups {
        let mut keep_group: Vec<&ArtifactRecord> = Vec::new();
        for row in &group {
            if protected.contains(&row.rpath) || row.kind == ArtifactKind::DeleteMarker {
                keep_group.push(row);
            } else {
                del.insert((row.rpath.clone(), row.size));
            }
        }

        if keep_group.is_empty() {
            continue;
        }

        let mut still_keep: Vec<&ArtifactRecord> = Vec::new();
        let last = keep_group.len() - 1;
        for row in keep_group[..last].iter().copied() {
            if row.kind == ArtifactKind::DeleteMarker {
                del.insert((row.rpath.clone(), row.size));
            } else {
                still_keep.push(row);
            }
        }
        still_keep.push(keep_group[last]);

        // A lone delete marker hides nothing that survived
        if still_keep.len() == 1 && still_keep[0].kind == ArtifactKind::DeleteMarker {
            del.insert((still_keep[0].rpath.clone(), still_keep[0].size));
        }
    }

    PrunePlan {
        rpaths: del.into_iter().collect(),
    }
}

/// Plan deletion of explicitly named real paths. Referenced rows refuse
/// unless `force`, in which case the referencing reference rows are pulled
/// into the plan as well (transitively) so no broken chain survives.
pub fn plan_rpaths(store: &IndexStore, rpaths: &[String], force: bool) -> Result<PrunePlan> {
    let mut del: BTreeSet<(String, i64)> = BTreeSet::new();
    let mut broken: Vec<String> = Vec::new();

    for rpath in rpaths {
        let Some(rec) = store.get(rpath) else {
            tracing::warn!("no catalog entry for {rpath:?}");
            continue;
        };

        let mut stack = vec![rec];
        while let Some(current) = stack.pop() {
            for referrer in store.direct_referencers(&current.rpath) {
                if del.iter().any(|(r, _)| r == &referrer) {
                    continue;
                }
                if force {
                    if let Some(r) = store.get(&referrer) {
                        tracing::info!(
                            "also pruning {referrer:?} which references {:?}",
                            current.rpath
                        );
                        stack.push(r);
                    }
                } else {
                    broken.push(format!("{:?} is referenced by {referrer:?}", current.rpath));
                }
            }
            del.insert((current.rpath.clone(), current.size));
        }
    }

    if !broken.is_empty() {
        bail!(
            "pruning would break references:\n  {}\nuse --force to prune the references too",
            broken.join("\n  ")
        );
    }

    Ok(PrunePlan {
        rpaths: del.into_iter().collect(),
    })
}

/// Add every node of a reference chain to the protected set
fn protect_chain(store: &IndexStore, row: &ArtifactRecord, protected: &mut HashSet<String>) {
    let mut current = row.referent.clone();
    for _ in 0..MAX_REF_HOPS {
        let Some(rpath) = current else { break };
        if !protected.insert(rpath.clone()) {
            break;
        }
        current = store.get(&rpath).and_then(|r| r.referent);
    }
}
