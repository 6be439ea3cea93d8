//! Naming codec: apparent path ⇄ real path
//!
//! A real path carries the apparent path, a fourteen-digit UTC stamp, and an
//! optional flag. The stamp is injected before the recognized extension run so
//! that `logs/archive.tar.gz` stored at `T` becomes
//! `logs/archive.<T>.tar.gz` and a human can still read the destination.

use crate::timestamps::{fmt_dt14, parse_dt14};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Leaf filename used to preserve otherwise-empty directories
pub const DFB_EMPTY: &str = ".dfbempty";

/// Flag appended to the stamp in a real path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    None,
    Reference,
    Delete,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::None => "",
            Flag::Reference => "R",
            Flag::Delete => "D",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "" => Some(Flag::None),
            "R" => Some(Flag::Reference),
            "D" => Some(Flag::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extensions recognized when deciding how far the extension run extends.
/// The final extension always splits; earlier ones join the run only while
/// each is in this table. Mirrors the media-type tables used by listing
/// tools, plus compound-name helpers like `min`.
const KNOWN_EXTENSIONS: &[&str] = &[
    "7z", "aac", "avi", "bak", "bin", "bmp", "bz2", "c", "cfg", "conf", "cpp", "css",
    "csv", "dat", "db", "doc", "docx", "flac", "gif", "go", "gz", "h", "hpp", "htm",
    "html", "ico", "ini", "iso", "java", "jpeg", "jpg", "js", "json", "jsonl", "log",
    "lz", "lzma", "md", "min", "mjs", "mkv", "mov", "mp3", "mp4", "odp", "ods", "odt",
    "ogg", "pdf", "pl", "png", "ppt", "pptx", "ps", "py", "rb", "rs", "rst", "rtf",
    "sh", "sql", "svg", "tar", "tgz", "tif", "tiff", "toml", "ts", "tsv", "txt",
    "wav", "webm", "webp", "xls", "xlsx", "xml", "xz", "yaml", "yml", "zip", "zst",
];

fn is_known_ext(ext: &str) -> bool {
    KNOWN_EXTENSIONS.binary_search(&ext).is_ok()
}

/// Split a path into stem and extension run, allowing multi-part extensions
/// like `.tar.gz`. The first extension always splits; the run grows backwards
/// while each earlier part is recognized. A leading dot never starts an
/// extension, so `.bashrc` has no extension at all.
pub fn smart_splitext(path: &str) -> (String, String) {
    let (parent, name) = split_parent(path);

    let mut parts: Vec<String> = name.split('.').map(str::to_string).collect();
    if parts[0].is_empty() && parts.len() > 1 {
        // Leading dot: fold it into the first real component
        let merged = format!(".{}", parts[1]);
        parts.remove(0);
        parts[0] = merged;
    }

    if parts.len() == 1 {
        return (path.to_string(), String::new());
    }

    // Grow the run while earlier parts are recognized; the first part is
    // never consumed.
    let n = parts.len();
    let mut ix = 1;
    while ix < n - 1 {
        if !is_known_ext(&parts[n - ix - 1].to_ascii_lowercase()) {
            break;
        }
        ix += 1;
    }

    let stem = parts[..n - ix].join(".");
    let ext = format!(".{}", parts[n - ix..].join("."));
    (join_parent(parent, &stem), ext)
}

/// Build the real path for `(apath, timestamp, flag)`
pub fn apath_to_rpath(apath: &str, ts: i64, flag: Flag) -> String {
    let (stem, ext) = smart_splitext(apath);
    format!("{stem}.{}{}{ext}", fmt_dt14(ts), flag.as_str())
}

/// Parse a real path back into `(apath, timestamp, flag)`.
///
/// Returns None when no valid stamp is present; such files are user-placed
/// artifacts and pass through untouched. For names holding several stamps the
/// parse picks the one nearest the end: the extension-aware split is tried
/// first, a bare trailing stamp second.
pub fn rpath_to_apath(rpath: &str) -> Option<(String, i64, Flag)> {
    let (parent, rname) = split_parent(rpath);

    // A bare trailing stamp is by definition the one nearest the end
    if let Some((aname, tag)) = rname.rsplit_once('.') {
        if let Some((ts, flag)) = parse_dateflag(tag) {
            return Some((join_parent(parent, aname), ts, flag));
        }
    }

    // Otherwise split off the extension run and look in front of it. The
    // stamp is not a known extension, so this handles file.<ts>.tar.gz and
    // file.tar.<ts>.gz alike.
    let (base_w_tag, ext) = smart_splitext(rname);
    if let Some((base, tag)) = base_w_tag.rsplit_once('.') {
        if let Some((ts, flag)) = parse_dateflag(tag) {
            let apath = join_parent(parent, &format!("{base}{ext}"));
            return Some((apath, ts, flag));
        }
    }

    None
}

/// Parse a `<ts14>[R|D]` tag, tolerating a leading dot
fn parse_dateflag(tag: &str) -> Option<(i64, Flag)> {
    let tag = tag.strip_prefix('.').unwrap_or(tag);
    if tag.len() < 14 {
        return None;
    }
    let (digits, suffix) = tag.split_at(14);
    let flag = Flag::from_suffix(suffix)?;
    let ts = parse_dt14(digits).ok()?;
    Some((ts, flag))
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

fn join_parent(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Normalize a slash-separated path lexically, resolving `.` and `..`
pub fn normalize_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            p => out.push(p),
        }
    }
    out.join("/")
}

/// Lexical relative path from `base_dir` to `target` (both slash-separated)
pub fn relative_to(target: &str, base_dir: &str) -> Result<String> {
    let t: Vec<&str> = target.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let b: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty() && *p != ".").collect();

    let common = t.iter().zip(b.iter()).take_while(|(a, c)| a == c).count();
    let mut parts: Vec<String> = Vec::new();
    for _ in common..b.len() {
        parts.push("..".to_string());
    }
    parts.extend(t[common..].iter().map(|s| s.to_string()));
    if parts.is_empty() {
        anyhow::bail!("{target:?} is the base directory itself");
    }
    Ok(parts.join("/"))
}
