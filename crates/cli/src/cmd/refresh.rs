//! Rebuild the index from the destination listing

use crate::cmd::Context;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(config_path: &Path, use_snapshots: bool) -> Result<i32> {
    let ctx = Context::open(config_path, true)?;

    println!("{}", "Rebuilding index from destination...".dimmed());
    let report = dfb_engine::refresh(
        &ctx.store,
        &ctx.driver,
        &ctx.run_config,
        use_snapshots,
        ctx.now,
    )?;

    println!("{}", "Refresh complete".green().bold());
    println!(
        "  {} row(s), {} reference(s), {} enriched from snapshots",
        report.rows, report.references, report.enriched
    );
    if report.skipped > 0 {
        println!("  {}", format!("{} name(s) skipped", report.skipped).yellow());
    }
    Ok(0)
}
