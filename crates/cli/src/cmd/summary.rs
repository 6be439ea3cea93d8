//! Aggregate information about the backup

use crate::cmd::Context;
use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(config_path: &Path) -> Result<i32> {
    let ctx = Context::open(config_path, false)?;

    let stats = ctx.store.stats(None);
    let timestamps = ctx.store.run_timestamps("", None, None);

    println!("{}", "Backup summary".bold());
    println!("  Source:      {}", ctx.config.src);
    println!("  Destination: {}", ctx.config.dst);
    println!();
    println!(
        "  Current: {} file(s) ({})",
        stats.current_files.to_string().cyan(),
        util::format_size(stats.current_size)
    );
    println!(
        "  Total:   {} artifact(s) ({})",
        stats.total_rows.to_string().cyan(),
        util::format_size(stats.total_size)
    );

    match (timestamps.first(), timestamps.last()) {
        (Some(first), Some(last)) => {
            println!(
                "  Runs:    {} between {} and {}",
                timestamps.len().to_string().cyan(),
                util::format_ts(*first),
                util::format_ts(*last)
            );
        }
        _ => println!("  Runs:    {}", "none recorded".dimmed()),
    }
    Ok(0)
}
