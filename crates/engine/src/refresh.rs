//! Refresh and import: rebuilding the index
//!
//! Refresh replaces the catalog from an authoritative destination listing;
//! snapshot sidecars only enrich what the listing already proved to exist.
//! Import loads action-dump files directly, adding rows without requiring a
//! destination object, for cold-storage workflows.

use crate::error::RunError;
use crate::settings::RunConfig;
use crate::workers::{phase_map, CancelFlag};
use anyhow::Result;
use dfb_core::actions::ActionKind;
use dfb_core::record::basename;
use dfb_core::{
    decode_reference, rpath_to_apath, ActionLine, ArtifactKind, ArtifactRecord, Flag, Remote,
    TransferDriver, DFB_EMPTY,
};
use dfb_index::sidecar::read_jsonl_file;
use dfb_index::{read_remote_sidecars, IndexStore, ResolvedRef};
use std::collections::HashMap;
use std::path::PathBuf;

/// Outcome of a refresh
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub rows: usize,
    pub references: usize,
    /// Names that could not be classified or inserted
    pub skipped: usize,
    /// Rows whose metadata came from a sidecar instead of a payload fetch
    pub enriched: usize,
}

/// Outcome of an import
#[derive(Debug, Default)]
pub struct ImportReport {
    pub inserted: usize,
    pub pruned: usize,
    pub skipped: usize,
}

/// Authoritatively rebuild the catalog from the destination listing
pub fn refresh(
    store: &IndexStore,
    driver: &dyn TransferDriver,
    config: &RunConfig,
    use_snapshots: bool,
    now: i64,
) -> Result<RefreshReport> {
    if config.disable_refresh {
        return Err(RunError::RefreshDisabled.into());
    }

    let entries = driver
        .list(Remote::Dst, "")
        .map_err(|e| RunError::DestinationUnavailable(format!("{e:#}")))?;

    store.reset()?;
    let mut report = RefreshReport::default();

    // Sidecars are advisory: they fill in source-side metadata and reference
    // targets the listing cannot provide, but never add rows
    let (snap_by_rpath, snap_by_ref) = if use_snapshots {
        load_snapshot_maps(driver)?
    } else {
        (HashMap::new(), HashMap::new())
    };

    let mut unresolved: Vec<String> = Vec::new();

    for entry in entries {
        if entry.is_dir {
            continue;
        }
        if entry.path.starts_with(".dfb/") || basename(&entry.path).starts_with(".swap.") {
            continue;
        }

        let mut rec = match rpath_to_apath(&entry.path) {
            Some((apath, ts, flag)) => {
                let kind = match flag {
                    Flag::Delete => ArtifactKind::DeleteMarker,
                    Flag::Reference => ArtifactKind::Reference,
                    Flag::None if basename(&apath) == DFB_EMPTY => ArtifactKind::EmptyDirMarker,
                    Flag::None => ArtifactKind::Regular,
                };
                let mut rec = ArtifactRecord::new(&apath, &entry.path, ts, kind);
                if kind != ArtifactKind::DeleteMarker {
                    rec.size = entry.size;
                }
                rec.mtime = entry.mtime;
                rec.checksum = entry.checksum.clone();
                rec.dstinfo = true;
                rec
            }
            None => {
                // No stamp: a user dropped this file in by hand. Pass it
                // through with the best timestamp available.
                let ts = entry.mtime.map(|m| m as i64).unwrap_or(now);
                tracing::info!(
                    "no timestamp in {:?}; treating as user-placed artifact at {ts}",
                    entry.path
                );
                let mut rec =
                    ArtifactRecord::new(&entry.path, &entry.path, ts, ArtifactKind::Regular);
                rec.size = entry.size;
                rec.mtime = entry.mtime;
                rec.checksum = entry.checksum.clone();
                rec.dstinfo = true;
                rec
            }
        };

        if rec.kind == ArtifactKind::Reference {
            if let Some(line) = snap_by_ref.get(&rec.rpath) {
                rec.referent = line.rpath.clone();
                rec.mtime = line.mtime;
                rec.checksum = line.checksum.clone();
                rec.dstinfo = false;
                report.enriched += 1;
            } else {
                unresolved.push(rec.rpath.clone());
            }
        } else if rec.kind == ArtifactKind::Regular {
            if let Some(line) = snap_by_rpath.get(&rec.rpath) {
                if line.size == Some(rec.size) && line.timestamp == Some(rec.timestamp) {
                    rec.mtime = line.mtime.or(rec.mtime);
                    rec.checksum = line.checksum.clone().or(rec.checksum.take());
                    rec.dstinfo = false;
                    report.enriched += 1;
                } else {
                    tracing::warn!(
                        "snapshot entry for {:?} does not match the listing; ignoring",
                        rec.rpath
                    );
                }
            }
        }

        let is_ref = rec.kind == ArtifactKind::Reference;
        match store.insert(&rec, false) {
            Ok(()) => {
                report.rows += 1;
                if is_ref {
                    report.references += 1;
                }
            }
            Err(e) => {
                tracing::warn!("could not index {:?}: {e:#}", rec.rpath);
                report.skipped += 1;
            }
        }
    }
    tracing::info!(
        "found {} artifacts at destination with {} reference(s)",
        report.rows,
        report.references
    );

    // Fetch the payloads of references the sidecars did not cover
    if !unresolved.is_empty() {
        tracing::info!("need to fetch {} reference payload(s)", unresolved.len());
        let mut resolved: Vec<(String, String)> = Vec::new();
        phase_map(
            unresolved,
            config.reference_workers,
            config.queue_depth,
            &CancelFlag::new(),
            |rpath| {
                let referent = driver
                    .get_small(&rpath)
                    .and_then(|payload| decode_reference(&rpath, &payload));
                match referent {
                    Ok(referent) => Ok((rpath, referent)),
                    Err(e) => Err((rpath, format!("{e:#}"))),
                }
            },
            |res| match res {
                Ok(pair) => resolved.push(pair),
                Err((rpath, msg)) => {
                    tracing::warn!("could not resolve reference {rpath:?}: {msg}");
                }
            },
        );
        for (rpath, referent) in resolved {
            store.enrich(&rpath, |rec| rec.referent = Some(referent.clone()))?;
        }
    }

    // With every referent recorded, cache terminal metadata on each
    // reference row. Chains ending nowhere read as deleted.
    for rec in store.reference_rows() {
        match store.resolve(&rec) {
            ResolvedRef::Terminal(terminal) => {
                store.enrich(&rec.rpath, |r| {
                    r.size = terminal.size;
                    if r.mtime.is_none() {
                        r.mtime = terminal.mtime;
                    }
                    if r.checksum.is_none() {
                        r.checksum = terminal.checksum.clone();
                    }
                })?;
            }
            ResolvedRef::Broken(reason) => {
                tracing::warn!("{reason}; treating {:?} as deleted", rec.rpath);
                store.enrich(&rec.rpath, |r| r.size = -1)?;
            }
        }
    }

    Ok(report)
}

/// Load action-dump files into the catalog. Rows may exist without a
/// destination object. Files apply in name order; PRUNE records apply after
/// every insertion so a later prune removes an earlier row.
pub fn import_files(
    store: &IndexStore,
    files: &[PathBuf],
    reset: bool,
    config: &RunConfig,
) -> Result<ImportReport> {
    if config.disable_refresh {
        return Err(RunError::RefreshDisabled.into());
    }
    if reset {
        store.reset()?;
    }

    let mut sorted: Vec<PathBuf> = files.to_vec();
    sorted.sort_by_key(|p| p.file_name().map(|n| n.to_owned()));

    let mut report = ImportReport::default();
    let mut prunes: Vec<String> = Vec::new();

    for file in &sorted {
        tracing::debug!("importing from {}", file.display());
        let mut count = 0;
        for line in read_jsonl_file(file)? {
            match line.kind() {
                ActionKind::Comment => {}
                ActionKind::Prune => {
                    if let Some(rpath) = line.rpath {
                        prunes.push(rpath);
                    }
                }
                _ => match line.to_record() {
                    Ok(rec) => {
                        // Import overwrites: a newer export wins
                        if store.get(&rec.rpath).is_some() {
                            store.remove(&rec.rpath)?;
                        }
                        match store.insert(&rec, false) {
                            Ok(()) => {
                                count += 1;
                                report.inserted += 1;
                            }
                            Err(e) => {
                                tracing::warn!("import skipped {:?}: {e:#}", rec.rpath);
                                report.skipped += 1;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("bad import line in {}: {e:#}", file.display());
                        report.skipped += 1;
                    }
                },
            }
        }
        tracing::info!("imported {count} rows from {}", file.display());
    }

    for rpath in prunes {
        if store.remove(&rpath)?.is_some() {
            report.pruned += 1;
        }
    }

    Ok(report)
}

type SnapMaps = (HashMap<String, ActionLine>, HashMap<String, ActionLine>);

fn load_snapshot_maps(driver: &dyn TransferDriver) -> Result<SnapMaps> {
    let mut by_rpath = HashMap::new();
    let mut by_ref = HashMap::new();

    for line in read_remote_sidecars(driver)? {
        match line.kind() {
            ActionKind::Prune | ActionKind::Comment | ActionKind::Delete => continue,
            ActionKind::MoveByReference => {
                if let Some(ref_rpath) = line.ref_rpath.clone() {
                    by_ref.insert(ref_rpath, line);
                }
            }
            _ => {
                if let Some(rpath) = line.rpath.clone() {
                    by_rpath.insert(rpath, line);
                }
            }
        }
    }
    Ok((by_rpath, by_ref))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupRun;
    use crate::settings::Attrib;
    use dfb_core::LocalDriver;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        src: std::path::PathBuf,
        dst: std::path::PathBuf,
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
            tmp,
            src,
            dst,
            driver,
            store,
            config: RunConfig::default(),
        }
    }

    fn backup_at(fx: &Fixture, now: i64) {
        let run = BackupRun::new(&fx.config, &fx.driver, &fx.store, now);
        let plan = run.plan("").unwrap();
        run.execute(&plan, None);
    }

    #[test]
    fn test_refresh_reconstructs_catalog() -> Result<()> {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;

        // Create, modify, delete, and rename across four runs
        fs::write(fx.src.join("foo.txt"), b"a")?;
        fs::write(fx.src.join("keep.bin"), b"payload-1")?;
        backup_at(&fx, 1);
        fs::write(fx.src.join("foo.txt"), b"ab")?;
        backup_at(&fx, 2);
        fs::remove_file(fx.src.join("foo.txt"))?;
        fs::rename(fx.src.join("keep.bin"), fx.src.join("moved.bin"))?;
        backup_at(&fx, 3);

        let before = fx.store.all_records();

        // Rebuild from nothing and compare
        let report = refresh(&fx.store, &fx.driver, &fx.config, false, 100)?;
        assert_eq!(report.rows, before.len());
        assert_eq!(report.references, 1);

        let mut after = fx.store.all_records();
        after.sort_by(|a, b| a.rpath.cmp(&b.rpath));
        let mut before = before;
        before.sort_by(|a, b| a.rpath.cmp(&b.rpath));
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.rpath, a.rpath);
            assert_eq!(b.kind, a.kind);
            assert_eq!(b.timestamp, a.timestamp);
            assert_eq!(b.size, a.size);
            assert_eq!(b.referent, a.referent);
        }

        // A backup against the same source now produces zero actions
        let run = BackupRun::new(&fx.config, &fx.driver, &fx.store, 10);
        let plan = run.plan("")?;
        assert!(plan.is_empty(), "unexpected actions after refresh: {plan:?}");
        Ok(())
    }

    #[test]
    fn test_refresh_user_placed_artifact_passthrough() -> Result<()> {
        let fx = fixture();
        fs::write(fx.dst.join("manual.txt"), b"dropped in by hand")?;

        let report = refresh(&fx.store, &fx.driver, &fx.config, false, 42)?;
        assert_eq!(report.rows, 1);

        let rec = fx.store.get("manual.txt").unwrap();
        assert_eq!(rec.apath, "manual.txt");
        assert_eq!(rec.kind, ArtifactKind::Regular);
        // Timestamp derives from the file's mtime
        assert!(rec.timestamp > 42);
        Ok(())
    }

    #[test]
    fn test_refresh_broken_reference_reads_deleted() -> Result<()> {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;
        fs::write(fx.src.join("a.bin"), b"payload-2")?;
        backup_at(&fx, 1);
        fs::rename(fx.src.join("a.bin"), fx.src.join("b.bin"))?;
        backup_at(&fx, 2);

        // Remove the referent object entirely, then refresh
        fs::remove_file(fx.dst.join("a.19700101000001.bin"))?;
        refresh(&fx.store, &fx.driver, &fx.config, false, 100)?;

        let rec = fx.store.get("b.19700101000002R.bin").unwrap();
        assert_eq!(rec.size, -1);
        Ok(())
    }

    #[test]
    fn test_refresh_disabled_refuses() {
        let mut fx = fixture();
        fx.config.disable_refresh = true;
        let err = refresh(&fx.store, &fx.driver, &fx.config, false, 1).unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 5);
    }

    #[test]
    fn test_refresh_with_snapshots_recovers_metadata() -> Result<()> {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;

        // Run a backup with a sidecar, then push it
        fs::write(fx.src.join("x.txt"), b"xyz")?;
        let snap_dir = fx.tmp.path().join("snapshots");
        let run = BackupRun::new(&fx.config, &fx.driver, &fx.store, 1);
        let plan = run.plan("")?;
        let mut writer =
            dfb_index::SidecarWriter::create(&snap_dir, 1, dfb_index::SidecarKind::Backup)?;
        run.execute(&plan, Some(&mut writer));
        writer.finalize()?;
        dfb_index::push_snapshots(&snap_dir, &fx.driver)?;

        let original_mtime = fx.store.get("x.19700101000001.txt").unwrap().mtime;

        let report = refresh(&fx.store, &fx.driver, &fx.config, true, 100)?;
        assert_eq!(report.enriched, 1);
        let rec = fx.store.get("x.19700101000001.txt").unwrap();
        // Metadata came from the sidecar, so the row is source-authoritative
        assert!(!rec.dstinfo);
        assert_eq!(rec.mtime, original_mtime);
        Ok(())
    }

    #[test]
    fn test_import_with_prune_ordering() -> Result<()> {
        let fx = fixture();
        let dir = fx.tmp.path().join("exports");
        fs::create_dir_all(&dir)?;

        // First export inserts two rows; second prunes one of them
        let rec_a = ArtifactRecord {
            size: 3,
            ..ArtifactRecord::new("a.txt", "a.19700101000001.txt", 1, ArtifactKind::Regular)
        };
        let rec_b = ArtifactRecord {
            size: 4,
            ..ArtifactRecord::new("b.txt", "b.19700101000001.txt", 1, ArtifactKind::Regular)
        };

        let mut f1 = fs::File::create(dir.join("000001.backup.jsonl"))?;
        writeln!(f1, "{}", ActionLine::from_record(&rec_a, None).to_json()?)?;
        writeln!(f1, "{}", ActionLine::from_record(&rec_b, None).to_json()?)?;
        let mut f2 = fs::File::create(dir.join("000002.prune.jsonl"))?;
        writeln!(f2, "{}", ActionLine::comment("prune run").to_json()?)?;
        writeln!(f2, "{}", ActionLine::prune("a.19700101000001.txt", Some(3)).to_json()?)?;

        let report = import_files(
            &fx.store,
            &[dir.join("000001.backup.jsonl"), dir.join("000002.prune.jsonl")],
            false,
            &fx.config,
        )?;
        assert_eq!(report.inserted, 2);
        assert_eq!(report.pruned, 1);

        assert!(fx.store.get("a.19700101000001.txt").is_none());
        assert!(fx.store.get("b.19700101000001.txt").is_some());
        Ok(())
    }
}
