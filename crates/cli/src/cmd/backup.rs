//! Run a backup

use crate::cmd::{write_dump, Context};
use crate::util;
use anyhow::Result;
use dfb_engine::BackupRun;
use dfb_index::{push_snapshots, SidecarKind, SidecarWriter};
use owo_colors::OwoColorize;
use std::path::Path;

/// Run-record header line: identifies the run in its sidecar
pub(crate) fn run_header(ctx: &Context) -> dfb_core::ActionLine {
    let host = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    dfb_core::ActionLine::comment(&format!(
        "run={} host={} config={}",
        dfb_core::fmt_dt14(ctx.now),
        host,
        ctx.run_config.config_id
    ))
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: &Path,
    subdir: &str,
    dry_run: bool,
    dump: Option<&Path>,
    refresh_first: bool,
    use_snapshots: bool,
) -> Result<i32> {
    let ctx = Context::open(config_path, true)?;

    if refresh_first {
        println!("{}", "Refreshing index from destination...".dimmed());
        dfb_engine::refresh(&ctx.store, &ctx.driver, &ctx.run_config, use_snapshots, ctx.now)?;
    }

    let run = BackupRun::new(&ctx.run_config, &ctx.driver, &ctx.store, ctx.now);
    let plan = run.plan(subdir)?;

    println!("{}", "Backup plan".bold());
    println!("  New:      {}", plan.new_count.to_string().cyan());
    println!("  Modified: {}", plan.modified_count.to_string().cyan());
    println!("  Deleted:  {}", plan.deletes.len().to_string().cyan());
    println!("  Moves:    {}", plan.moves.len().to_string().cyan());
    for (from, to) in &plan.moves {
        println!("    {from:?} --> {to:?}");
    }
    if plan.noops > 0 {
        println!("  No-ops:   {}", plan.noops.to_string().yellow());
    }

    if dry_run {
        println!("{}", "Dry run; nothing transferred".yellow());
        return Ok(0);
    }
    if let Some(output) = dump {
        write_dump(&run.dump_lines(&plan), output)?;
        return Ok(0);
    }
    if plan.is_empty() {
        println!("{}", "Nothing to do".dimmed());
        return Ok(0);
    }

    let mut writer = SidecarWriter::create(&ctx.snap_dir, ctx.now, SidecarKind::Backup)?;
    writer.append(&run_header(&ctx))?;
    let outcome = run.execute(&plan, Some(&mut writer));
    writer.finalize()?;
    if let Err(e) = push_snapshots(&ctx.snap_dir, &ctx.driver) {
        tracing::warn!("could not push snapshots: {e:#}");
    }

    let report = &outcome.report;
    println!();
    println!("{}", "Backup complete".green().bold());
    println!(
        "  Uploaded {} / referenced {} / copied {} / deleted {}",
        report.uploaded, report.referenced, report.copied, report.deleted
    );
    if report.missing_hash > 0 {
        println!(
            "  {}",
            format!("{} file(s) compared by size (missing hashes)", report.missing_hash).yellow()
        );
    }
    if !report.failures.is_empty() {
        println!("  {}", format!("{} action(s) failed:", report.failures.len()).red());
        for f in &report.failures {
            println!("    [{}] {}: {}", f.phase, f.apath, f.message);
        }
    }
    if report.inconsistencies > 0 {
        println!(
            "  {}",
            format!(
                "{} index commit(s) lost; run 'dfb refresh' to reconcile",
                report.inconsistencies
            )
            .red()
        );
    }
    println!("  Elapsed: {}", util::format_elapsed(report.elapsed));

    Ok(report.exit_code())
}
