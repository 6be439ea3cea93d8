//! Backup planner and executor
//!
//! Lists the source, diffs it against the current logical state, tracks
//! renames, and executes the resulting actions in three phases: uploads and
//! server-side copies first, references second (they must observe their
//! referent at the destination), delete markers last. Every successful
//! action commits its row to the index immediately.

use crate::error::{ActionFailure, RunError, RunReport};
use crate::settings::{Attrib, RunConfig};
use crate::workers::{phase_map, CancelFlag};
use anyhow::Result;
use dfb_core::checksum::checksums_match;
use dfb_core::record::basename;
use dfb_core::{
    apath_to_rpath, encode_reference, ActionLine, ArtifactKind, ArtifactRecord, ChecksumSet,
    Flag, Remote, TransferDriver, DFB_EMPTY,
};
use dfb_index::{IndexStore, ResolvedRef, SidecarWriter, StateQuery};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

/// One file from the source listing
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub apath: String,
    pub size: i64,
    pub mtime: Option<f64>,
    pub checksum: Option<ChecksumSet>,
}

/// A tracked move: content that disappeared at one apparent path and
/// reappeared at another. `source_rpath` is the terminal regular artifact
/// the new version will point at (or be copied from).
#[derive(Debug, Clone)]
pub struct MoveAction {
    pub original_apath: String,
    pub source_rpath: String,
    pub entry: SourceEntry,
}

/// The ordered action set for one run
#[derive(Debug, Default)]
pub struct BackupPlan {
    pub uploads: Vec<SourceEntry>,
    pub copies: Vec<MoveAction>,
    pub references: Vec<MoveAction>,
    /// Apparent paths receiving a delete marker this run
    pub deletes: Vec<String>,
    /// Rows to update in place with better source-side metadata
    pub enrich: Vec<(String, SourceEntry)>,
    /// Display pairs (from, to) for tracked moves
    pub moves: Vec<(String, String)>,
    /// Counts folded into the run report
    pub noops: usize,
    pub missing_hash: usize,
    /// Sizes for summary output
    pub new_count: usize,
    pub modified_count: usize,
}

impl BackupPlan {
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
            && self.copies.is_empty()
            && self.references.is_empty()
            && self.deletes.is_empty()
    }

    pub fn action_count(&self) -> usize {
        self.uploads.len() + self.copies.len() + self.references.len() + self.deletes.len()
    }
}

/// Outcome of executing a plan
#[derive(Debug)]
pub struct BackupOutcome {
    pub report: RunReport,
}

/// One backup run against a single source/destination pair
pub struct BackupRun<'a> {
    config: &'a RunConfig,
    driver: &'a dyn TransferDriver,
    store: &'a IndexStore,
    /// The run timestamp; every artifact this run produces carries it
    pub now: i64,
    cancel: CancelFlag,
}

impl<'a> BackupRun<'a> {
    pub fn new(
        config: &'a RunConfig,
        driver: &'a dyn TransferDriver,
        store: &'a IndexStore,
        now: i64,
    ) -> Self {
        Self {
            config,
            driver,
            store,
            now,
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Diff source against the current logical state and produce the action
    /// set. Re-planning against an unchanged source and index yields an
    /// empty plan.
    pub fn plan(&self, subdir: &str) -> Result<BackupPlan> {
        let src = self.list_source(subdir)?;
        let state = self.current_state(subdir);
        tracing::info!(
            "source has {} files; backup currently tracks {}",
            src.len(),
            state.len()
        );

        let mut plan = BackupPlan::default();
        let mut new_paths: Vec<String> = Vec::new();
        let mut modified: Vec<String> = Vec::new();

        for (apath, sfile) in &src {
            let Some(dfile) = state.get(apath) else {
                new_paths.push(apath.clone());
                continue;
            };

            // An existing empty-dir marker always matches: markers are only
            // re-emitted when a directory transitions to empty
            let matched = if basename(apath) == DFB_EMPTY {
                true
            } else {
                let attrib = if dfile.dstinfo {
                    self.config.dst_compare
                } else {
                    self.config.compare
                };
                self.entry_matches(sfile, dfile, attrib, &mut plan.missing_hash)
            };

            if !matched {
                modified.push(apath.clone());
            } else if dfile.dstinfo {
                // Matched on destination metadata; store the richer source
                // metadata so future runs compare source-to-source
                plan.enrich.push((dfile.rpath.clone(), sfile.clone()));
            }
        }

        let mut deleted: Vec<String> = state
            .keys()
            .filter(|apath| !src.contains_key(*apath))
            .cloned()
            .collect();
        deleted.sort();

        // Rename tracking
        let moves = self.track_moves(&src, &state, &mut new_paths, &deleted);

        plan.new_count = new_paths.len();
        plan.modified_count = modified.len();

        // Assemble actions, collapsing same-second re-runs to no-ops
        for apath in new_paths.into_iter().chain(modified) {
            if self.is_same_second_noop(&apath, &mut plan) {
                continue;
            }
            plan.uploads.push(src[&apath].clone());
        }

        for (dfile, sfile) in moves {
            if self.is_same_second_noop(&sfile.apath, &mut plan) {
                continue;
            }
            // A move needs the terminal regular artifact; a broken chain
            // demotes the move to a plain upload
            let terminal = match dfile.kind {
                ArtifactKind::Reference => match self.store.resolve(&dfile) {
                    ResolvedRef::Terminal(t) => t,
                    ResolvedRef::Broken(reason) => {
                        tracing::warn!(
                            "{}; uploading instead",
                            RunError::IntegrityViolation(reason)
                        );
                        plan.uploads.push(sfile);
                        continue;
                    }
                },
                _ => dfile.clone(),
            };

            plan.moves.push((dfile.apath.clone(), sfile.apath.clone()));
            let action = MoveAction {
                original_apath: dfile.apath.clone(),
                source_rpath: terminal.rpath,
                entry: sfile,
            };
            if self.config.server_side_copy_moves
                && self.driver.supports_copy_between()
                && action.entry.size > self.config.min_ref_size
            {
                plan.copies.push(action);
            } else {
                plan.references.push(action);
            }
        }

        for apath in deleted {
            if self.is_same_second_noop(&apath, &mut plan) {
                continue;
            }
            plan.deletes.push(apath);
        }

        Ok(plan)
    }

    /// Execute a plan phase by phase, committing each success to the index
    pub fn execute(
        &self,
        plan: &BackupPlan,
        mut sidecar: Option<&mut SidecarWriter>,
    ) -> BackupOutcome {
        let t0 = Instant::now();
        let mut report = RunReport {
            noops: plan.noops,
            missing_hash: plan.missing_hash,
            ..Default::default()
        };

        for (rpath, sfile) in &plan.enrich {
            let update = sfile.clone();
            if let Err(e) = self.store.enrich(rpath, move |rec| {
                rec.mtime = update.mtime;
                if update.checksum.is_some() {
                    rec.checksum = update.checksum;
                }
                rec.dstinfo = false;
            }) {
                tracing::warn!("could not refresh metadata for {rpath:?}: {e:#}");
            }
        }

        // Phase 1: uploads
        let upload_items: Vec<ArtifactRecord> = plan
            .uploads
            .iter()
            .map(|sfile| self.upload_record(sfile))
            .collect();
        phase_map(
            upload_items,
            self.config.upload_workers,
            self.config.queue_depth,
            &self.cancel,
            |rec| {
                let result = if rec.kind == ArtifactKind::EmptyDirMarker {
                    tracing::info!("uploading empty dir marker {:?}", rec.rpath);
                    self.driver.put_small(&rec.rpath, b"")
                } else {
                    tracing::info!("uploading {:?} to {:?}", rec.apath, rec.rpath);
                    self.driver.copy_to(&rec.apath, &rec.rpath).map(|_| ())
                };
                match result {
                    Ok(()) => Ok(rec),
                    Err(e) => Err(ActionFailure::new("upload", &rec.apath, format!("{e:#}"))),
                }
            },
            |res| match res {
                Ok(rec) => {
                    let line = ActionLine::from_record(&rec, None);
                    if self.commit_row(&rec, line, &mut sidecar, &mut report) {
                        report.uploaded += 1;
                    }
                }
                Err(f) => {
                    tracing::error!("upload error: {} ({})", f.apath, f.message);
                    report.failures.push(f);
                }
            },
        );

        // Phase 1b: server-side copies
        let copy_items: Vec<(MoveAction, ArtifactRecord)> = plan
            .copies
            .iter()
            .map(|action| {
                let rec = self.move_record(action, ArtifactKind::Regular);
                (action.clone(), rec)
            })
            .collect();
        phase_map(
            copy_items,
            self.config.upload_workers,
            self.config.queue_depth,
            &self.cancel,
            |(action, rec)| {
                tracing::info!(
                    "moving {:?} to {:?} via server-side copy",
                    action.original_apath,
                    rec.apath
                );
                match self.driver.copy_between(&action.source_rpath, &rec.rpath) {
                    Ok(()) => Ok((action, rec)),
                    Err(e) => Err(ActionFailure::new("copy", &rec.apath, format!("{e:#}"))),
                }
            },
            |res| match res {
                Ok((action, rec)) => {
                    let mut line = ActionLine::from_record(&rec, Some(&action.original_apath));
                    line.source_rpath = Some(action.source_rpath.clone());
                    if self.commit_row(&rec, line, &mut sidecar, &mut report) {
                        report.copied += 1;
                    }
                }
                Err(f) => {
                    tracing::error!("copy error: {} ({})", f.apath, f.message);
                    report.failures.push(f);
                }
            },
        );

        // Phase 2: references, only after every upload and copy has settled
        let ref_items: Vec<(MoveAction, ArtifactRecord)> = plan
            .references
            .iter()
            .map(|action| {
                let rec = self.move_record(action, ArtifactKind::Reference);
                (action.clone(), rec)
            })
            .collect();
        phase_map(
            ref_items,
            self.config.reference_workers,
            self.config.queue_depth,
            &self.cancel,
            |(action, rec)| {
                tracing::info!(
                    "moving {:?} to {:?} with reference {:?}",
                    action.original_apath,
                    rec.apath,
                    rec.rpath
                );
                let run = || -> Result<()> {
                    let payload = encode_reference(&rec.rpath, &action.source_rpath)?;
                    self.driver.put_small(&rec.rpath, payload.as_bytes())
                };
                match run() {
                    Ok(()) => Ok((action, rec)),
                    Err(e) => Err(ActionFailure::new("reference", &rec.apath, format!("{e:#}"))),
                }
            },
            |res| match res {
                Ok((action, rec)) => {
                    let line = ActionLine::from_record(&rec, Some(&action.original_apath));
                    if self.commit_row(&rec, line, &mut sidecar, &mut report) {
                        report.referenced += 1;
                    }
                }
                Err(f) => {
                    tracing::error!("reference error: {} ({})", f.apath, f.message);
                    report.failures.push(f);
                }
            },
        );

        // Phase 3: delete markers
        let del_items: Vec<ArtifactRecord> = plan
            .deletes
            .iter()
            .map(|apath| {
                ArtifactRecord::new(
                    apath,
                    &apath_to_rpath(apath, self.now, Flag::Delete),
                    self.now,
                    ArtifactKind::DeleteMarker,
                )
            })
            .collect();
        phase_map(
            del_items,
            self.config.delete_workers,
            self.config.queue_depth,
            &self.cancel,
            |rec| {
                tracing::info!("deleting {:?} with {:?}", rec.apath, rec.rpath);
                match self.driver.put_small(&rec.rpath, b"DEL") {
                    Ok(()) => Ok(rec),
                    Err(e) => Err(ActionFailure::new("delete", &rec.apath, format!("{e:#}"))),
                }
            },
            |res| match res {
                Ok(rec) => {
                    let line = ActionLine::from_record(&rec, None);
                    if self.commit_row(&rec, line, &mut sidecar, &mut report) {
                        report.deleted += 1;
                    }
                }
                Err(f) => {
                    tracing::error!("delete error: {} ({})", f.apath, f.message);
                    report.failures.push(f);
                }
            },
        );

        report.elapsed = t0.elapsed();
        BackupOutcome { report }
    }

    /// Render a plan as action-dump lines instead of executing it
    pub fn dump_lines(&self, plan: &BackupPlan) -> Vec<ActionLine> {
        let mut lines = Vec::with_capacity(plan.action_count());
        for sfile in &plan.uploads {
            lines.push(ActionLine::from_record(&self.upload_record(sfile), None));
        }
        for action in &plan.copies {
            let rec = self.move_record(action, ArtifactKind::Regular);
            let mut line = ActionLine::from_record(&rec, Some(&action.original_apath));
            line.source_rpath = Some(action.source_rpath.clone());
            lines.push(line);
        }
        for action in &plan.references {
            let rec = self.move_record(action, ArtifactKind::Reference);
            lines.push(ActionLine::from_record(&rec, Some(&action.original_apath)));
        }
        for apath in &plan.deletes {
            let rec = ArtifactRecord::new(
                apath,
                &apath_to_rpath(apath, self.now, Flag::Delete),
                self.now,
                ArtifactKind::DeleteMarker,
            );
            lines.push(ActionLine::from_record(&rec, None));
        }
        lines
    }

    fn commit_row(
        &self,
        rec: &ArtifactRecord,
        line: ActionLine,
        sidecar: &mut Option<&mut SidecarWriter>,
        report: &mut RunReport,
    ) -> bool {
        match self.store.insert(rec, false) {
            Ok(()) => {
                if let Some(writer) = sidecar.as_mut() {
                    if let Err(e) = writer.append(&line) {
                        tracing::warn!("sidecar append failed for {:?}: {e:#}", rec.rpath);
                    }
                }
                true
            }
            Err(e) => {
                if self.store.get(&rec.rpath).is_some() {
                    report.failures.push(ActionFailure::new(
                        "commit",
                        &rec.apath,
                        RunError::ConflictingArtifact {
                            rpath: rec.rpath.clone(),
                        },
                    ));
                } else {
                    tracing::error!(
                        "index commit failed after destination write of {:?}: {e:#}; \
                         refresh will reconcile",
                        rec.rpath
                    );
                    report.inconsistencies += 1;
                }
                false
            }
        }
    }

    fn upload_record(&self, sfile: &SourceEntry) -> ArtifactRecord {
        let kind = if basename(&sfile.apath) == DFB_EMPTY {
            ArtifactKind::EmptyDirMarker
        } else {
            ArtifactKind::Regular
        };
        let mut rec = ArtifactRecord::new(
            &sfile.apath,
            &apath_to_rpath(&sfile.apath, self.now, Flag::None),
            self.now,
            kind,
        );
        rec.size = sfile.size;
        rec.mtime = sfile.mtime;
        rec.checksum = sfile.checksum.clone();
        rec
    }

    fn move_record(&self, action: &MoveAction, kind: ArtifactKind) -> ArtifactRecord {
        let flag = match kind {
            ArtifactKind::Reference => Flag::Reference,
            _ => Flag::None,
        };
        let mut rec = ArtifactRecord::new(
            &action.entry.apath,
            &apath_to_rpath(&action.entry.apath, self.now, flag),
            self.now,
            kind,
        );
        rec.size = action.entry.size;
        rec.mtime = action.entry.mtime;
        rec.checksum = action.entry.checksum.clone();
        if kind == ArtifactKind::Reference {
            rec.referent = Some(action.source_rpath.clone());
        }
        rec
    }

    fn is_same_second_noop(&self, apath: &str, plan: &mut BackupPlan) -> bool {
        if self.store.contains_version(apath, self.now) {
            tracing::warn!(
                "{apath:?} already has a version at {}; re-run within the same second \
                 collapses to a no-op",
                self.now
            );
            plan.noops += 1;
            true
        } else {
            false
        }
    }

    fn list_source(&self, subdir: &str) -> Result<BTreeMap<String, SourceEntry>> {
        let entries = self
            .driver
            .list(Remote::Src, subdir)
            .map_err(|e| RunError::SourceUnavailable(format!("{e:#}")))?;

        let mut files: BTreeMap<String, SourceEntry> = BTreeMap::new();
        let mut dirs: BTreeSet<String> = BTreeSet::new();
        let mut parents: BTreeSet<String> = BTreeSet::new();

        for entry in entries {
            if entry.is_dir {
                parents.insert(dfb_core::record::parent(&entry.path).to_string());
                dirs.insert(entry.path);
                continue;
            }
            parents.insert(dfb_core::record::parent(&entry.path).to_string());
            files.insert(
                entry.path.clone(),
                SourceEntry {
                    apath: entry.path,
                    size: entry.size,
                    mtime: entry.mtime,
                    checksum: entry.checksum,
                },
            );
        }

        if self.config.empty_dir_markers {
            for dir in dirs.difference(&parents) {
                let apath = format!("{dir}/{DFB_EMPTY}");
                files.insert(
                    apath.clone(),
                    SourceEntry {
                        apath,
                        size: 0,
                        mtime: None,
                        checksum: None,
                    },
                );
            }
        }

        Ok(files)
    }

    fn current_state(&self, subdir: &str) -> BTreeMap<String, ArtifactRecord> {
        self.store
            .state_at(&StateQuery {
                subpath: subdir.to_string(),
                ..Default::default()
            })
            .into_iter()
            .map(|e| (e.rec.apath.clone(), e.rec))
            .collect()
    }

    /// Compare one source entry against its current row. Size always
    /// participates; a hash comparison with no usable digests falls back to
    /// size with a warning.
    fn entry_matches(
        &self,
        sfile: &SourceEntry,
        dfile: &ArtifactRecord,
        attrib: Attrib,
        missing_hash: &mut usize,
    ) -> bool {
        if sfile.size != dfile.size {
            return false;
        }
        match attrib {
            Attrib::Size | Attrib::Disabled => true,
            Attrib::Mtime => match (sfile.mtime, dfile.mtime) {
                (Some(s), Some(d)) => (s - d).abs() < self.config.mtime_tolerance,
                _ => false,
            },
            Attrib::Hash => {
                let (Some(scheck), Some(dcheck)) = (&sfile.checksum, &dfile.checksum) else {
                    tracing::warn!(
                        "missing hashes for {:?}; reverting to size comparison",
                        sfile.apath
                    );
                    *missing_hash += 1;
                    return true;
                };
                match checksums_match(scheck, dcheck) {
                    Some(matched) => matched,
                    None => {
                        tracing::warn!(
                            "no shared hash algorithm for {:?}; reverting to size comparison",
                            sfile.apath
                        );
                        *missing_hash += 1;
                        true
                    }
                }
            }
        }
    }

    /// Pair deleted content with new paths of identical content. Candidates
    /// bucket by size; the configured attribute decides identity; ambiguous
    /// candidates are left alone. When two new paths claim the same prior
    /// artifact the lexicographically first wins and the rest upload.
    fn track_moves(
        &self,
        src: &BTreeMap<String, SourceEntry>,
        state: &BTreeMap<String, ArtifactRecord>,
        new_paths: &mut Vec<String>,
        deleted: &[String],
    ) -> Vec<(ArtifactRecord, SourceEntry)> {
        if deleted.is_empty() || new_paths.is_empty() {
            return Vec::new();
        }
        if !self.config.renames.enabled() && !self.config.dst_renames.enabled() {
            return Vec::new();
        }

        let mut del_by_size: HashMap<i64, Vec<&ArtifactRecord>> = HashMap::new();
        for apath in deleted {
            let dfile = &state[apath];
            del_by_size.entry(dfile.size).or_default().push(dfile);
        }

        new_paths.sort();
        let mut moves: Vec<(ArtifactRecord, SourceEntry)> = Vec::new();
        let mut claimed: BTreeSet<String> = BTreeSet::new();
        let mut moved_new: BTreeSet<String> = BTreeSet::new();

        for apath in new_paths.iter() {
            if basename(apath) == DFB_EMPTY {
                continue;
            }
            let sfile = &src[apath];
            if self.config.min_rename_size > 0 && sfile.size <= self.config.min_rename_size {
                tracing::debug!(
                    "skipped rename tracking on {apath:?}: size {} at or below threshold",
                    sfile.size
                );
                continue;
            }

            let mut scratch = 0;
            let mut candidates: Vec<&ArtifactRecord> = Vec::new();
            if let Some(list) = del_by_size.get(&sfile.size) {
                for dfile in list.iter().copied() {
                    let attrib = if dfile.dstinfo {
                        self.config.dst_renames
                    } else {
                        self.config.renames
                    };
                    if attrib.enabled() && self.entry_matches(sfile, dfile, attrib, &mut scratch)
                    {
                        candidates.push(dfile);
                    }
                }
            }

            match candidates.as_slice() {
                [] => {}
                [dfile] => {
                    // Lexicographic tie-break: the first new path to claim a
                    // prior artifact keeps it
                    if claimed.insert(dfile.rpath.clone()) {
                        moves.push(((*dfile).clone(), sfile.clone()));
                        moved_new.insert(apath.clone());
                    } else {
                        tracing::debug!(
                            "{:?} already claimed by an earlier move; {apath:?} uploads",
                            dfile.rpath
                        );
                    }
                }
                _ => {
                    tracing::info!("too many content matches for {apath:?}; not moving");
                }
            }
        }

        // Moved paths leave the upload set; the originals keep their delete
        // markers so the rename is visible in history
        new_paths.retain(|apath| !moved_new.contains(apath));
        moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfb_core::LocalDriver;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        src: std::path::PathBuf,
        driver: LocalDriver,
        store: IndexStore,
        config: RunConfig,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        let driver = LocalDriver::new(&src, &dst);
        let store = IndexStore::open(&tmp.path().join("idx.db")).unwrap();
        Fixture {
            _tmp: tmp,
            src,
            driver,
            store,
            config: RunConfig::default(),
        }
    }

    fn run_at(fx: &Fixture, now: i64) -> RunReport {
        let run = BackupRun::new(&fx.config, &fx.driver, &fx.store, now);
        let plan = run.plan("").unwrap();
        run.execute(&plan, None).report
    }

    #[test]
    fn test_new_modified_deleted_cycle() {
        let fx = fixture();
        fs::write(fx.src.join("foo.txt"), b"a").unwrap();

        let report = run_at(&fx, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.exit_code(), 0);
        let rec = fx.store.get("foo.19700101000001.txt").unwrap();
        assert_eq!(rec.size, 1);

        fs::write(fx.src.join("foo.txt"), b"ab").unwrap();
        let report = run_at(&fx, 2);
        assert_eq!(report.uploaded, 1);

        fs::remove_file(fx.src.join("foo.txt")).unwrap();
        let report = run_at(&fx, 3);
        assert_eq!(report.deleted, 1);
        let marker = fx.store.get("foo.19700101000003D.txt").unwrap();
        assert_eq!(marker.kind, ArtifactKind::DeleteMarker);
        assert_eq!(marker.size, -1);
    }

    #[test]
    fn test_replan_is_idempotent() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), b"aaa").unwrap();
        fs::create_dir_all(fx.src.join("sub")).unwrap();
        fs::write(fx.src.join("sub/b.txt"), b"bb").unwrap();

        run_at(&fx, 1);

        let run = BackupRun::new(&fx.config, &fx.driver, &fx.store, 2);
        let plan = run.plan("").unwrap();
        assert!(plan.is_empty(), "second plan should be empty: {plan:?}");
    }

    #[test]
    fn test_rename_by_reference() {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;
        fs::write(fx.src.join("a.bin"), b"content-H").unwrap();

        run_at(&fx, 1);

        fs::rename(fx.src.join("a.bin"), fx.src.join("b.bin")).unwrap();
        let report = run_at(&fx, 2);
        assert_eq!(report.referenced, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.uploaded, 0);

        let reference = fx.store.get("b.19700101000002R.bin").unwrap();
        assert_eq!(reference.kind, ArtifactKind::Reference);
        assert_eq!(reference.referent.as_deref(), Some("a.19700101000001.bin"));
        assert_eq!(reference.size, 9);

        // The reference payload landed at the destination
        let payload = fx.driver.get_small("b.19700101000002R.bin").unwrap();
        assert_eq!(
            payload,
            br#"{"ver":2,"rel":"a.19700101000001.bin"}"#
        );

        // And the old apath got a delete marker at the same run timestamp
        assert!(fx.store.get("a.19700101000002D.bin").is_some());
    }

    #[test]
    fn test_rename_by_server_side_copy() {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;
        fx.config.server_side_copy_moves = true;
        fs::write(fx.src.join("a.bin"), b"content-H").unwrap();

        run_at(&fx, 1);
        fs::rename(fx.src.join("a.bin"), fx.src.join("b.bin")).unwrap();
        let report = run_at(&fx, 2);
        assert_eq!(report.copied, 1);
        assert_eq!(report.referenced, 0);

        let copy = fx.store.get("b.19700101000002.bin").unwrap();
        assert_eq!(copy.kind, ArtifactKind::Regular);
        assert_eq!(fx.driver.get_small("b.19700101000002.bin").unwrap(), b"content-H");
    }

    #[test]
    fn test_min_rename_size_disables_tracking() {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;
        fx.config.min_rename_size = 100;
        fs::write(fx.src.join("a.bin"), b"tiny").unwrap();

        run_at(&fx, 1);
        fs::rename(fx.src.join("a.bin"), fx.src.join("b.bin")).unwrap();
        let report = run_at(&fx, 2);
        assert_eq!(report.referenced, 0);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn test_move_tie_break_lexicographic() {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;
        fs::write(fx.src.join("orig.bin"), b"same-content").unwrap();
        run_at(&fx, 1);

        // Two new paths with the same content and mtime as the vanished one
        let mtime = fs::metadata(fx.src.join("orig.bin")).unwrap().modified().unwrap();
        fs::rename(fx.src.join("orig.bin"), fx.src.join("copy2.bin")).unwrap();
        fs::write(fx.src.join("copy1.bin"), b"same-content").unwrap();
        let f = fs::File::options().write(true).open(fx.src.join("copy1.bin")).unwrap();
        f.set_modified(mtime).unwrap();
        drop(f);

        let run = BackupRun::new(&fx.config, &fx.driver, &fx.store, 2);
        let plan = run.plan("").unwrap();
        // copy1 sorts first and wins the reference; copy2 uploads
        assert_eq!(plan.references.len(), 1);
        assert_eq!(plan.references[0].entry.apath, "copy1.bin");
        assert_eq!(plan.uploads.len(), 1);
        assert_eq!(plan.uploads[0].apath, "copy2.bin");
        assert_eq!(plan.deletes, vec!["orig.bin".to_string()]);
    }

    #[test]
    fn test_empty_dir_markers_transition() {
        let mut fx = fixture();
        fx.config.empty_dir_markers = true;
        fs::create_dir_all(fx.src.join("empty")).unwrap();
        fs::write(fx.src.join("top.txt"), b"x").unwrap();

        let report = run_at(&fx, 1);
        assert_eq!(report.uploaded, 2); // top.txt + marker
        let marker = fx.store.get("empty/.dfbempty.19700101000001").unwrap();
        assert_eq!(marker.kind, ArtifactKind::EmptyDirMarker);
        assert_eq!(marker.size, 0);

        // Still empty: nothing to do (markers are transition-triggered)
        let run = BackupRun::new(&fx.config, &fx.driver, &fx.store, 2);
        assert!(run.plan("").unwrap().is_empty());

        // Directory gains a file: the marker path gets a delete marker
        fs::write(fx.src.join("empty/now.txt"), b"y").unwrap();
        let report = run_at(&fx, 3);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.deleted, 1);
        assert!(fx.store.get("empty/.dfbempty.19700101000003D").is_some());
    }

    #[test]
    fn test_same_second_rerun_is_noop() {
        let fx = fixture();
        fs::write(fx.src.join("foo.txt"), b"a").unwrap();
        let report = run_at(&fx, 1);
        assert_eq!(report.uploaded, 1);

        fs::write(fx.src.join("foo.txt"), b"bb").unwrap();
        let report = run_at(&fx, 1);
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.noops, 1);
    }

    #[test]
    fn test_zero_byte_file_roundtrip() {
        let fx = fixture();
        fs::write(fx.src.join("zero.dat"), b"").unwrap();
        let report = run_at(&fx, 1);
        assert_eq!(report.uploaded, 1);
        let rec = fx.store.get("zero.19700101000001.dat").unwrap();
        assert_eq!(rec.size, 0);
        assert_eq!(fx.driver.get_small("zero.19700101000001.dat").unwrap(), b"");
    }

    #[test]
    fn test_recreate_after_delete() {
        let fx = fixture();
        fs::write(fx.src.join("foo.txt"), b"a").unwrap();
        run_at(&fx, 1);
        fs::remove_file(fx.src.join("foo.txt")).unwrap();
        run_at(&fx, 2);

        fs::write(fx.src.join("foo.txt"), b"back").unwrap();
        let report = run_at(&fx, 3);
        assert_eq!(report.uploaded, 1);
        assert!(fx.store.get("foo.19700101000003.txt").is_some());
    }

    #[test]
    fn test_dump_lines_cover_all_kinds() {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;
        fs::write(fx.src.join("a.bin"), b"payload-x").unwrap();
        fs::write(fx.src.join("gone.txt"), b"g").unwrap();
        run_at(&fx, 1);

        fs::rename(fx.src.join("a.bin"), fx.src.join("b.bin")).unwrap();
        fs::remove_file(fx.src.join("gone.txt")).unwrap();
        fs::write(fx.src.join("new.txt"), b"n").unwrap();

        let run = BackupRun::new(&fx.config, &fx.driver, &fx.store, 2);
        let plan = run.plan("").unwrap();
        let lines = run.dump_lines(&plan);

        use dfb_core::actions::ActionKind;
        let kinds: Vec<ActionKind> = lines.iter().map(|l| l.kind()).collect();
        assert!(kinds.contains(&ActionKind::Upload));
        assert!(kinds.contains(&ActionKind::MoveByReference));
        assert!(kinds.contains(&ActionKind::Delete));
        // Nothing was executed
        assert!(fx.store.get("new.19700101000002.txt").is_none());
    }
}
