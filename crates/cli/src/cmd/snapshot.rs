//! Export state (or full history) as action-dump jsonl

use crate::cmd::{write_dump, Context};
use anyhow::Result;
use dfb_core::ActionLine;
use dfb_index::StateQuery;
use std::path::Path;

pub fn run(
    config_path: &Path,
    path: &str,
    at: Option<&str>,
    export: bool,
    output: Option<&Path>,
) -> Result<i32> {
    let ctx = Context::open(config_path, false)?;

    let lines: Vec<ActionLine> = if export {
        // Every stored version, importable elsewhere via `dfb import`
        ctx.store
            .all_records()
            .iter()
            .filter(|rec| path.is_empty() || rec.apath.starts_with(&format!("{path}/")))
            .map(|rec| ActionLine::from_record(rec, None))
            .collect()
    } else {
        let query = StateQuery {
            at: at.map(|expr| ctx.parse_time(expr)).transpose()?,
            subpath: path.trim_end_matches('/').to_string(),
            ..Default::default()
        };
        ctx.store
            .state_at(&query)
            .iter()
            .map(|entry| ActionLine::from_record(&entry.rec, None))
            .collect()
    };

    let stdout = Path::new("-");
    write_dump(&lines, output.unwrap_or(stdout))?;
    Ok(0)
}
