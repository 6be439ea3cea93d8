//! Restore: materialize a point-in-time state into a local directory

use anyhow::{Context, Result};
use dfb_core::TransferDriver;
use dfb_index::{IndexStore, StateQuery};
use std::fs;
use std::path::Path;

/// Outcome of a restore
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub files: usize,
    pub bytes: i64,
    pub dirs: usize,
    pub skipped: usize,
}

/// Write the logical state at `at` over `subpath` into `dest_dir`. Empty-dir
/// markers become directories; broken references are skipped with a warning.
pub fn restore(
    store: &IndexStore,
    driver: &dyn TransferDriver,
    at: Option<i64>,
    subpath: &str,
    dest_dir: &Path,
) -> Result<RestoreReport> {
    let entries = store.state_at(&StateQuery {
        at,
        subpath: subpath.to_string(),
        deref: true,
        ..Default::default()
    });

    let sub = subpath.trim_end_matches('/');
    let mut report = RestoreReport::default();

    for entry in entries {
        let rel = if sub.is_empty() {
            entry.rec.apath.clone()
        } else {
            entry.rec.apath[sub.len() + 1..].to_string()
        };
        let local = dest_dir.join(&rel);

        if entry.rec.is_empty_marker() {
            let dir = local.parent().context("marker path has no parent")?;
            fs::create_dir_all(dir)?;
            report.dirs += 1;
            continue;
        }

        // Dereferenced target when the row is a reference, else the row itself
        let rpath = entry
            .target
            .as_ref()
            .map(|t| t.rpath.clone())
            .unwrap_or_else(|| entry.rec.rpath.clone());

        let bytes = match driver.get_small(&rpath) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("could not fetch {rpath:?} for {:?}: {e:#}", entry.rec.apath);
                report.skipped += 1;
                continue;
            }
        };
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&local, &bytes)
            .with_context(|| format!("failed to write {}", local.display()))?;
        report.files += 1;
        report.bytes += bytes.len() as i64;
    }

    Ok(report)
}
