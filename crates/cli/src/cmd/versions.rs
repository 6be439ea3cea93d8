//! Show every stored version of one file

use crate::cmd::Context;
use crate::util;
use anyhow::Result;
use dfb_core::ArtifactKind;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(config_path: &Path, apath: &str, ref_count: bool) -> Result<i32> {
    let ctx = Context::open(config_path, false)?;

    let versions = ctx.store.versions(apath);
    if versions.is_empty() {
        println!("{}", format!("No versions of {apath:?}").dimmed());
        return Ok(0);
    }

    let mut header = vec![
        "Timestamp".to_string(),
        "size".to_string(),
        "kind".to_string(),
        "rpath".to_string(),
    ];
    if ref_count {
        header.insert(3, "refs".to_string());
    }
    let mut rows = vec![header];

    for rec in &versions {
        let kind = match rec.kind {
            ArtifactKind::Regular => "file",
            ArtifactKind::DeleteMarker => "delete",
            ArtifactKind::Reference => "reference",
            ArtifactKind::EmptyDirMarker => "empty-dir",
        };
        let mut row = vec![
            util::format_ts(rec.timestamp),
            util::format_size(rec.size),
            kind.to_string(),
            rec.rpath.clone(),
        ];
        if ref_count {
            row.insert(3, ctx.store.ref_count(&rec.rpath).to_string());
        }
        rows.push(row);
    }

    println!("{}", apath.bold());
    print!("{}", util::tabulate(&rows));
    Ok(0)
}
