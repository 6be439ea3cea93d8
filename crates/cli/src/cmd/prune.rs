//! Prune old artifacts

use crate::cmd::{write_dump, Context};
use crate::util;
use anyhow::{bail, Result};
use dfb_engine::PruneRun;
use dfb_index::{push_snapshots, SidecarKind, SidecarWriter};
use owo_colors::OwoColorize;
use std::path::Path;

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: &Path,
    when: Option<&str>,
    keep: i64,
    subdir: &str,
    rpaths: &[String],
    force: bool,
    dry_run: bool,
    dump: Option<&Path>,
) -> Result<i32> {
    let ctx = Context::open(config_path, true)?;
    let prune = PruneRun::new(&ctx.run_config, &ctx.driver, &ctx.store);

    let plan = if !rpaths.is_empty() {
        prune.plan_rpaths(rpaths, force)?
    } else {
        let Some(when) = when else {
            bail!("prune needs a cutoff time or --rpath entries");
        };
        let cutoff = ctx.parse_time(when)?;
        let mut msg = format!(
            "Pruning to {} ",
            dfb_core::timestamps::fmt_local(cutoff).cyan()
        );
        if keep > 0 {
            msg += &format!("keeping {keep} additional older version(s)");
        } else if keep < 0 {
            msg += &format!("plus removing {} newer version(s)", -keep);
        }
        println!("{}", msg.trim_end());
        prune.plan(cutoff, keep, subdir)?
    };

    if plan.is_empty() {
        println!("{}", "Nothing to prune".dimmed());
        return Ok(0);
    }

    println!(
        "Pruning {} artifact(s) ({})",
        plan.len().to_string().cyan(),
        util::format_size(plan.freed_bytes())
    );
    if dry_run {
        for (rpath, size) in &plan.rpaths {
            println!("  {rpath:?} ({})", util::format_size(*size));
        }
        println!("{}", "Dry run; nothing deleted".yellow());
        return Ok(0);
    }
    if let Some(output) = dump {
        write_dump(&prune.dump_lines(&plan), output)?;
        return Ok(0);
    }

    let mut writer = SidecarWriter::create(&ctx.snap_dir, ctx.now, SidecarKind::Prune)?;
    writer.append(&crate::cmd::backup::run_header(&ctx))?;
    let report = prune.execute(&plan, Some(&mut writer))?;
    writer.finalize()?;
    if let Err(e) = push_snapshots(&ctx.snap_dir, &ctx.driver) {
        tracing::warn!("could not push snapshots: {e:#}");
    }

    println!();
    println!("{}", "Prune complete".green().bold());
    println!("  Removed {} artifact(s)", report.pruned);
    if !report.failures.is_empty() {
        println!("  {}", format!("{} delete(s) failed:", report.failures.len()).red());
        for f in &report.failures {
            println!("    {}: {}", f.apath, f.message);
        }
    }
    println!("  Elapsed: {}", util::format_elapsed(report.elapsed));

    Ok(report.exit_code())
}
