//! Prune executor
//!
//! Takes a plan from the prune planner, annotates every candidate row as
//! pending in one pass, issues the destination deletes through the worker
//! pool, and removes rows per confirmed delete. An object that is already
//! absent counts as deleted; reconciliation stays idempotent.

use crate::error::{ActionFailure, RunError, RunReport};
use crate::settings::RunConfig;
use crate::workers::{phase_map, CancelFlag};
use anyhow::Result;
use dfb_core::{ActionLine, TransferDriver};
use dfb_index::{plan_prune, plan_rpaths, IndexStore, PrunePlan, SidecarWriter};
use std::time::Instant;

/// One prune run
pub struct PruneRun<'a> {
    config: &'a RunConfig,
    driver: &'a dyn TransferDriver,
    store: &'a IndexStore,
    cancel: CancelFlag,
}

impl<'a> PruneRun<'a> {
    pub fn new(
        config: &'a RunConfig,
        driver: &'a dyn TransferDriver,
        store: &'a IndexStore,
    ) -> Self {
        Self {
            config,
            driver,
            store,
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Plan a prune at `cutoff`, refusing outright when pruning is disabled
    pub fn plan(&self, cutoff: i64, keep: i64, subdir: &str) -> Result<PrunePlan> {
        if self.config.disable_prune {
            return Err(RunError::PruneDisabled.into());
        }
        Ok(plan_prune(self.store, cutoff, keep, subdir))
    }

    /// Plan deletion of explicitly named real paths
    pub fn plan_rpaths(&self, rpaths: &[String], force: bool) -> Result<PrunePlan> {
        if self.config.disable_prune {
            return Err(RunError::PruneDisabled.into());
        }
        plan_rpaths(self.store, rpaths, force)
    }

    /// Execute a plan: annotate, delete, commit per success
    pub fn execute(
        &self,
        plan: &PrunePlan,
        mut sidecar: Option<&mut SidecarWriter>,
    ) -> Result<RunReport> {
        let t0 = Instant::now();
        let mut report = RunReport::default();

        let rpaths: Vec<String> = plan.rpaths.iter().map(|(r, _)| r.clone()).collect();
        self.store.mark_pending_prune(&rpaths)?;

        phase_map(
            plan.rpaths.clone(),
            self.config.delete_workers,
            self.config.queue_depth,
            &self.cancel,
            |(rpath, size)| {
                tracing::info!("pruning {rpath:?}");
                match self.driver.delete(&rpath) {
                    Ok(()) => Ok((rpath, size)),
                    Err(e) => Err(ActionFailure::new("prune", &rpath, format!("{e:#}"))),
                }
            },
            |res| match res {
                Ok((rpath, size)) => match self.store.remove(&rpath) {
                    Ok(_) => {
                        if let Some(writer) = sidecar.as_mut() {
                            if let Err(e) = writer.append(&ActionLine::prune(&rpath, Some(size))) {
                                tracing::warn!("sidecar append failed for {rpath:?}: {e:#}");
                            }
                        }
                        report.pruned += 1;
                    }
                    Err(e) => {
                        tracing::error!("index removal failed for {rpath:?}: {e:#}");
                        report.inconsistencies += 1;
                    }
                },
                Err(f) => {
                    tracing::error!("prune error: {} ({})", f.apath, f.message);
                    report.failures.push(f);
                }
            },
        );

        report.elapsed = t0.elapsed();
        Ok(report)
    }

    /// Render a plan as PRUNE dump lines instead of executing it
    pub fn dump_lines(&self, plan: &PrunePlan) -> Vec<ActionLine> {
        plan.rpaths
            .iter()
            .map(|(rpath, size)| ActionLine::prune(rpath, Some(*size)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupRun;
    use crate::settings::Attrib;
    use dfb_core::LocalDriver;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
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
            _tmp: tmp,
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
    fn test_prune_deletes_old_versions() -> Result<()> {
        let fx = fixture();
        for (ts, content) in [(1, "a"), (2, "ab"), (3, "abc")] {
            fs::write(fx.src.join("foo.txt"), content)?;
            backup_at(&fx, ts);
        }
        assert_eq!(fx.store.len(), 3);

        let prune = PruneRun::new(&fx.config, &fx.driver, &fx.store);
        let plan = prune.plan(10, 0, "")?;
        let report = prune.execute(&plan, None)?;

        assert_eq!(report.pruned, 2);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(fx.store.len(), 1);
        assert!(!fx.dst.join("foo.19700101000001.txt").exists());
        assert!(!fx.dst.join("foo.19700101000002.txt").exists());
        assert!(fx.dst.join("foo.19700101000003.txt").exists());
        Ok(())
    }

    #[test]
    fn test_prune_disabled_refuses() {
        let mut fx = fixture();
        fx.config.disable_prune = true;
        let prune = PruneRun::new(&fx.config, &fx.driver, &fx.store);
        let err = prune.plan(10, 0, "").unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 5);
    }

    #[test]
    fn test_prune_reference_protection_end_to_end() -> Result<()> {
        let mut fx = fixture();
        fx.config.renames = Attrib::Mtime;

        fs::write(fx.src.join("a.bin"), b"content-H")?;
        backup_at(&fx, 1);
        fs::rename(fx.src.join("a.bin"), fx.src.join("b.bin"))?;
        backup_at(&fx, 2);

        // Prune at T2 with keep_versions=0: the referenced original survives
        let prune = PruneRun::new(&fx.config, &fx.driver, &fx.store);
        let plan = prune.plan(2, 0, "")?;
        prune.execute(&plan, None)?;
        assert!(fx.dst.join("a.19700101000001.bin").exists());
        assert!(fx.dst.join("b.19700101000002R.bin").exists());

        // Explicitly pruning the reference frees the referent
        let plan = prune.plan_rpaths(&["a.19700101000001.bin".to_string()], true)?;
        prune.execute(&plan, None)?;
        assert!(!fx.dst.join("a.19700101000001.bin").exists());
        assert!(!fx.dst.join("b.19700101000002R.bin").exists());
        Ok(())
    }

    #[test]
    fn test_prune_absent_object_still_commits() -> Result<()> {
        let fx = fixture();
        for (ts, content) in [(1, "a"), (2, "ab")] {
            fs::write(fx.src.join("foo.txt"), content)?;
            backup_at(&fx, ts);
        }
        // Someone deleted the object behind our back
        fs::remove_file(fx.dst.join("foo.19700101000001.txt"))?;

        let prune = PruneRun::new(&fx.config, &fx.driver, &fx.store);
        let plan = prune.plan(10, 0, "")?;
        let report = prune.execute(&plan, None)?;
        assert_eq!(report.pruned, 1);
        assert!(fx.store.get("foo.19700101000001.txt").is_none());
        Ok(())
    }
}
