//! Load action-dump files into the index

use crate::cmd::Context;
use anyhow::{bail, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

pub fn run(config_path: &Path, files: &[PathBuf], reset: bool) -> Result<i32> {
    if files.is_empty() {
        bail!("import needs at least one jsonl file");
    }
    let ctx = Context::open(config_path, true)?;

    let report = dfb_engine::import_files(&ctx.store, files, reset, &ctx.run_config)?;

    println!("{}", "Import complete".green().bold());
    println!(
        "  {} row(s) inserted, {} pruned",
        report.inserted, report.pruned
    );
    if report.skipped > 0 {
        println!("  {}", format!("{} line(s) skipped", report.skipped).yellow());
    }
    Ok(0)
}
