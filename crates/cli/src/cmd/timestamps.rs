//! List run timestamps

use crate::cmd::Context;
use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::path::Path;

pub fn run(
    config_path: &Path,
    path: &str,
    after: Option<&str>,
    before: Option<&str>,
) -> Result<i32> {
    let ctx = Context::open(config_path, false)?;

    let after = after.map(|expr| ctx.parse_time(expr)).transpose()?;
    let before = before.map(|expr| ctx.parse_time(expr)).transpose()?;
    let timestamps = ctx.store.run_timestamps(path, after, before);
    if timestamps.is_empty() {
        println!("{}", "No runs recorded".dimmed());
        return Ok(0);
    }

    // Rows per run over the selected subtree
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for apath in ctx.store.apaths_under(path) {
        for rec in ctx.store.versions(&apath) {
            *counts.entry(rec.timestamp).or_default() += 1;
        }
    }

    let mut rows = vec![vec![
        "Timestamp".to_string(),
        "unix".to_string(),
        "rows".to_string(),
    ]];
    for ts in timestamps {
        rows.push(vec![
            util::format_ts(ts),
            format!("u{ts}"),
            counts.get(&ts).copied().unwrap_or(0).to_string(),
        ]);
    }
    print!("{}", util::tabulate(&rows));
    Ok(0)
}
