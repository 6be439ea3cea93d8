//! Materialize a point-in-time state locally

use crate::cmd::Context;
use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(config_path: &Path, dest: &Path, at: Option<&str>, subdir: &str) -> Result<i32> {
    let ctx = Context::open(config_path, false)?;

    let at = at.map(|expr| ctx.parse_time(expr)).transpose()?;
    let report = dfb_engine::restore(&ctx.store, &ctx.driver, at, subdir, dest)?;

    println!("{}", "Restore complete".green().bold());
    println!(
        "  {} file(s) ({}), {} director(ies)",
        report.files,
        util::format_size(report.bytes),
        report.dirs
    );
    if report.skipped > 0 {
        println!(
            "  {}",
            format!("{} file(s) skipped (broken or unreachable)", report.skipped).red()
        );
        return Ok(3);
    }
    Ok(0)
}
