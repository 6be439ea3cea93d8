//! List files at a point in time

use crate::cmd::Context;
use crate::util;
use anyhow::Result;
use dfb_index::StateQuery;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(
    config_path: &Path,
    path: &str,
    at: Option<&str>,
    after: Option<&str>,
    recursive: bool,
    deleted: bool,
) -> Result<i32> {
    let ctx = Context::open(config_path, false)?;

    let query = StateQuery {
        at: at.map(|expr| ctx.parse_time(expr)).transpose()?,
        after: after.map(|expr| ctx.parse_time(expr)).transpose()?,
        subpath: path.trim_end_matches('/').to_string(),
        include_deleted: deleted,
        ..Default::default()
    };
    let listing = ctx.store.tree(&query, recursive);

    let mut rows = vec![vec![
        "versions".to_string(),
        "total_size".to_string(),
        "size".to_string(),
        "ModTime".to_string(),
        "Timestamp".to_string(),
        "path".to_string(),
    ]];

    if !recursive {
        for dir in &listing.dirs {
            rows.push(vec![
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                format!("{dir}/"),
            ]);
        }
    }
    for entry in &listing.files {
        let mut name = entry.rec.apath.clone();
        if !entry.rec.exists() {
            name.push_str(" (DEL)");
        }
        rows.push(vec![
            entry.versions.to_string(),
            util::format_size(entry.total_size),
            util::format_size(entry.rec.size),
            util::format_mtime(entry.rec.mtime),
            util::format_ts(entry.rec.timestamp),
            name,
        ]);
    }

    if rows.len() == 1 {
        println!("{}", "No files".dimmed());
    } else {
        print!("{}", util::tabulate(&rows));
    }
    Ok(0)
}
