//! Shared formatting helpers for CLI commands

use dfb_core::timestamps::fmt_local;

/// Format a byte count in human-readable form
pub fn format_size(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes < 0 {
        return "DEL".to_string();
    }
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Format a UTC timestamp for table output (local ISO)
pub fn format_ts(ts: i64) -> String {
    fmt_local(ts)
}

/// Format an optional mtime (fractional epoch seconds)
pub fn format_mtime(mtime: Option<f64>) -> String {
    match mtime {
        Some(m) => fmt_local(m as i64),
        None => String::new(),
    }
}

/// Format an elapsed duration compactly
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.2}s")
    } else if secs < 3600.0 {
        format!("{}m{:02.0}s", (secs / 60.0) as u64, secs % 60.0)
    } else {
        format!("{}h{:02}m", (secs / 3600.0) as u64, ((secs % 3600.0) / 60.0) as u64)
    }
}

/// Right-align columns, left-align the final one
pub fn tabulate(rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let ncols = rows[0].len();
    let mut widths = vec![0usize; ncols];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    for row in rows {
        let mut line = String::from("  ");
        for (i, cell) in row.iter().enumerate() {
            if i == ncols - 1 {
                line.push_str(cell);
            } else {
                line.push_str(&format!("{cell:>width$}  ", width = widths[i]));
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KiB");
        assert_eq!(format_size(1536), "1.50 KiB");
        assert_eq!(format_size(1024 * 1024), "1.00 MiB");
        assert_eq!(format_size(-1), "DEL");
    }

    #[test]
    fn test_tabulate_alignment() {
        let rows = vec![
            vec!["a".to_string(), "bb".to_string(), "path".to_string()],
            vec!["100".to_string(), "x".to_string(), "other/path".to_string()],
        ];
        let out = tabulate(&rows);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("path"));
        assert!(lines[1].starts_with("  100"));
    }
}
