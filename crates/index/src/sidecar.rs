//! Snapshot sidecars
//!
//! Each run appends the actions it commits to a line-delimited draft under
//! the local cache, renames it into place when the run ends, then compresses
//! and pushes it to `.dfb/snapshots/` at the destination. Sidecars are
//! advisory: refresh uses them to recover source-side metadata the
//! destination listing cannot provide, never to invent rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dfb_core::{ActionLine, Remote, TransferDriver};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Destination namespace holding sidecars (and nothing the backup planner
/// may ever list as payload)
pub const SNAPSHOT_PREFIX: &str = ".dfb/snapshots";

/// Which kind of run a sidecar records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarKind {
    Backup,
    Prune,
}

impl SidecarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SidecarKind::Backup => "backup",
            SidecarKind::Prune => "prune",
        }
    }
}

/// Relative sidecar path for a run: `<YYYY>/<YYYY-MM-DD>/<HHMMSS>.<kind>.jsonl`
pub fn sidecar_rel_path(run_ts: i64, kind: SidecarKind) -> String {
    let dt = DateTime::<Utc>::from_timestamp(run_ts, 0).expect("timestamp out of range");
    format!(
        "{}/{}/{}.{}.jsonl",
        dt.format("%Y"),
        dt.format("%Y-%m-%d"),
        dt.format("%H%M%S"),
        kind.as_str()
    )
}

/// Append-only draft writer for one run's sidecar
pub struct SidecarWriter {
    draft: PathBuf,
    final_path: PathBuf,
    file: BufWriter<File>,
    lines: usize,
}

impl SidecarWriter {
    /// Create a draft under `snap_dir` (the per-config snapshot cache)
    pub fn create(snap_dir: &Path, run_ts: i64, kind: SidecarKind) -> Result<Self> {
        let rel = sidecar_rel_path(run_ts, kind);
        let final_path = snap_dir.join(&rel);
        let draft = snap_dir.join("tmp").join(rel.replace('/', "_"));

        fs::create_dir_all(draft.parent().expect("draft has a parent"))?;
        let file = BufWriter::new(
            File::create(&draft)
                .with_context(|| format!("failed to create sidecar draft {}", draft.display()))?,
        );
        Ok(Self {
            draft,
            final_path,
            file,
            lines: 0,
        })
    }

    /// Append one committed action, flushed so a crash loses at most the
    /// final line
    pub fn append(&mut self, line: &ActionLine) -> Result<()> {
        let json = line.to_json()?;
        writeln!(self.file, "{json}")?;
        self.file.flush()?;
        self.lines += 1;
        Ok(())
    }

    /// Rename the draft into its final name. Empty drafts are discarded.
    pub fn finalize(mut self) -> Result<Option<PathBuf>> {
        self.file.flush()?;
        drop(self.file);

        if self.lines == 0 {
            fs::remove_file(&self.draft).ok();
            return Ok(None);
        }
        fs::create_dir_all(self.final_path.parent().expect("sidecar has a parent"))?;
        fs::rename(&self.draft, &self.final_path).with_context(|| {
            format!("failed to finalize sidecar {}", self.final_path.display())
        })?;
        Ok(Some(self.final_path))
    }
}

/// Compress finalized sidecars and upload them to the destination, removing
/// local copies on success. Also catches leftovers from interrupted runs.
pub fn push_snapshots(snap_dir: &Path, driver: &dyn TransferDriver) -> Result<usize> {
    let mut pushed = 0;

    for path in collect_files(snap_dir, "jsonl")? {
        if fs::metadata(&path)?.len() == 0 {
            tracing::debug!("removing empty sidecar {}", path.display());
            fs::remove_file(&path)?;
            continue;
        }
        let gz_path = path.with_extension("jsonl.gz");
        let tmp = gz_path.with_extension("gz.part");
        {
            let mut encoder = GzEncoder::new(File::create(&tmp)?, Compression::default());
            let mut input = File::open(&path)?;
            std::io::copy(&mut input, &mut encoder)?;
            encoder.finish()?;
        }
        fs::rename(&tmp, &gz_path)?;
        fs::remove_file(&path)?;
    }

    for path in collect_files(snap_dir, "gz")? {
        let rel = path
            .strip_prefix(snap_dir)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let remote = format!("{SNAPSHOT_PREFIX}/{rel}");
        let bytes = fs::read(&path)?;
        driver
            .put_small(&remote, &bytes)
            .with_context(|| format!("failed to push sidecar {remote:?}"))?;
        fs::remove_file(&path)?;
        tracing::debug!("pushed sidecar {remote}");
        pushed += 1;
    }

    Ok(pushed)
}

/// Read every sidecar at the destination, oldest first. Unreadable files
/// and unsupported compression are skipped with a warning; a missing
/// snapshot tree simply yields nothing.
pub fn read_remote_sidecars(driver: &dyn TransferDriver) -> Result<Vec<ActionLine>> {
    let entries = match driver.list(Remote::Dst, SNAPSHOT_PREFIX) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::info!("no snapshots available at destination: {e}");
            return Ok(Vec::new());
        }
    };

    let mut files: Vec<String> = entries
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.path)
        .collect();
    files.sort();

    let mut lines = Vec::new();
    for rel in files {
        let remote = format!("{SNAPSHOT_PREFIX}/{rel}");
        let raw = match driver.get_small(&remote) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("could not fetch sidecar {remote:?}: {e}");
                continue;
            }
        };

        let text = if rel.ends_with(".gz") {
            let mut decoder = GzDecoder::new(&raw[..]);
            let mut out = String::new();
            if let Err(e) = decoder.read_to_string(&mut out) {
                tracing::warn!("corrupt sidecar {remote:?}: {e}");
                continue;
            }
            out
        } else if rel.ends_with(".xz") {
            tracing::warn!("skipping xz sidecar {remote:?}: xz is not supported");
            continue;
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };

        let mut count = 0;
        for line in BufReader::new(text.as_bytes()).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match ActionLine::from_json(&line) {
                Ok(parsed) => {
                    lines.push(parsed);
                    count += 1;
                }
                Err(e) => tracing::warn!("bad sidecar line in {remote:?}: {e}"),
            }
        }
        tracing::info!("loaded {count} entries from {rel}");
    }
    Ok(lines)
}

/// Read a local action-dump file, transparently decompressing `.gz`
pub fn read_jsonl_file(path: &Path) -> Result<Vec<ActionLine>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut lines = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        lines.push(
            ActionLine::from_json(&line)
                .with_context(|| format!("bad action line in {}", path.display()))?,
        );
    }
    Ok(lines)
}

fn collect_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    // Drafts of in-flight (or interrupted) runs live under tmp/ and are
    // never pushed; only finalized sidecars leave the machine
    let drafts = dir.join("tmp");
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                if path != drafts {
                    stack.push(path);
                }
            } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}
