//! Timestamp codec: flexible user expressions in, fixed UTC stamps out
//!
//! Every persisted timestamp is UTC seconds since the epoch. On artifacts the
//! stamp is the fixed fourteen-digit `YYYYMMDDHHMMSS` form with no separators.
//! User expressions are far more forgiving: ISO-8601 variants, `u<seconds>`,
//! relative offsets like "2 days 4 hours", and the literal `now`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Length of the on-artifact date stamp
pub const DT14_LEN: usize = 14;

/// Format a UTC epoch timestamp as the fixed fourteen-digit stamp
pub fn fmt_dt14(ts: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(ts, 0).expect("timestamp out of range");
    dt.format("%Y%m%d%H%M%S").to_string()
}

/// Parse a fourteen-digit stamp (UTC, no separators) back to epoch seconds
pub fn parse_dt14(s: &str) -> Result<i64> {
    if s.len() != DT14_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
        bail!("not a fourteen-digit stamp: {s:?}");
    }
    let naive = naive_from_digits(s)?;
    Ok(Utc.from_utc_datetime(&naive).timestamp())
}

/// Render a timestamp as a local ISO string for display
pub fn fmt_local(ts: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(ts, 0).expect("timestamp out of range");
    dt.with_timezone(&Local).format("%Y-%m-%dT%H:%M:%S%z").to_string()
}

/// Parse a user time expression into UTC epoch seconds.
///
/// Accepted forms:
/// - `now`
/// - `u<seconds>` / `i<seconds>` raw Unix time
/// - relative offsets back from `now`, combining seconds/minutes/hours/days/
///   weeks in any order ("1 day 2.5 hours")
/// - ISO-8601 variants: optional `T` or space, optional `-`/`:` separators,
///   optional fractional seconds, `Z` or a numeric offset. A bare date means
///   midnight. Without an offset the expression is local time *at that
///   instant* (historical DST rules apply, not today's offset).
pub fn parse_time_expr(expr: &str, now: i64) -> Result<i64> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        bail!("empty time expression");
    }

    if trimmed.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    // Raw epoch seconds: u123456 or i123456 (fractional part discarded)
    let lower = trimmed.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix('u').or_else(|| lower.strip_prefix('i')) {
        if let Ok(secs) = rest.parse::<f64>() {
            return Ok(secs.trunc() as i64);
        }
    }

    if let Some(delta) = parse_timedelta(&lower) {
        return Ok(now - delta);
    }

    parse_iso8601(&lower)
}

/// Parse a relative expression like "2 days 4 hours" into total seconds.
/// Returns None when no recognized unit appears.
fn parse_timedelta(expr: &str) -> Option<i64> {
    const UNITS: &[(&str, f64)] = &[
        ("week", 604_800.0),
        ("day", 86_400.0),
        ("hour", 3_600.0),
        ("minute", 60.0),
        ("second", 1.0),
    ];

    let cleaned = expr.replace(',', " ");
    let mut total = 0.0f64;
    let mut matched = false;

    let mut chars = cleaned.chars().peekable();
    let mut pending: Option<f64> = None;
    while chars.peek().is_some() {
        // Number run
        let mut num = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                num.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if !num.is_empty() {
            pending = num.parse::<f64>().ok();
            continue;
        }

        // Word run
        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                word.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if word.is_empty() {
            chars.next(); // separator
            continue;
        }

        if let Some(&(_, secs)) = UNITS.iter().find(|(u, _)| word.starts_with(u)) {
            if let Some(val) = pending.take() {
                total += val * secs;
                matched = true;
            }
        } else {
            // An unrecognized word means this is not a relative expression
            return None;
        }
    }

    if matched {
        Some(total.round() as i64)
    } else {
        None
    }
}

fn parse_iso8601(expr: &str) -> Result<i64> {
    // Strip the cosmetic separators. '-' stays for now since it doubles as
    // both a date separator and an offset sign.
    let mut s: String = expr
        .chars()
        .filter(|&c| c != ':' && c != 't' && c != '_' && c != ' ')
        .collect();

    let ndigits = s.bytes().filter(|b| b.is_ascii_digit()).count();
    if ndigits <= 6 {
        bail!(
            "time expression needs at least a four-digit year, month, and day: {expr:?}"
        );
    }

    // Pull the timezone suffix. A bare eight-digit date carries no numeric
    // offset (its final `-NN` is a date separator, not a zone), so only the
    // trailing `z` form is considered there.
    let mut offset_secs: Option<i64> = None;
    if s.ends_with('z') {
        s.truncate(s.len() - 1);
        offset_secs = Some(0);
    } else if ndigits != 8 {
        let bytes = s.as_bytes();
        if bytes.len() >= 5
            && (bytes[bytes.len() - 5] == b'+' || bytes[bytes.len() - 5] == b'-')
            && bytes[bytes.len() - 4..].iter().all(u8::is_ascii_digit)
        {
            let sign = if bytes[bytes.len() - 5] == b'-' { -1 } else { 1 };
            let hh: i64 = s[s.len() - 4..s.len() - 2].parse()?;
            let mm: i64 = s[s.len() - 2..].parse()?;
            s.truncate(s.len() - 5);
            offset_secs = Some(sign * (hh * 3600 + mm * 60));
        } else if bytes.len() >= 3
            && (bytes[bytes.len() - 3] == b'+' || bytes[bytes.len() - 3] == b'-')
            && bytes[bytes.len() - 2..].iter().all(u8::is_ascii_digit)
        {
            let sign = if bytes[bytes.len() - 3] == b'-' { -1 } else { 1 };
            let hh: i64 = s[s.len() - 2..].parse()?;
            s.truncate(s.len() - 3);
            offset_secs = Some(sign * hh * 3600);
        }
    }

    // Everything left that matters is digits and an optional fractional part
    let digits: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    let whole = match digits.split_once('.') {
        Some((w, _frac)) => w.to_string(),
        None => digits,
    };

    if whole.len() > DT14_LEN {
        bail!("too many digits in time expression: {expr:?}");
    }
    // Pad missing minute/second fields with zeros
    let padded = format!("{whole:0<14}");
    let naive = naive_from_digits(&padded)
        .with_context(|| format!("unparseable time expression: {expr:?}"))?;

    match offset_secs {
        Some(off) => Ok(Utc.from_utc_datetime(&naive).timestamp() - off),
        None => local_to_epoch(naive),
    }
}

/// Interpret a naive wall-clock time as local time, honoring the tz database.
/// Ambiguous times (DST fold) take the earliest mapping; nonexistent times
/// (spring-forward gap) are shifted through the gap.
fn local_to_epoch(naive: NaiveDateTime) -> Result<i64> {
    if let Some(dt) = Local.from_local_datetime(&naive).earliest() {
        return Ok(dt.timestamp());
    }
    let shifted = naive + Duration::hours(1);
    if let Some(dt) = Local.from_local_datetime(&shifted).earliest() {
        return Ok((dt - Duration::hours(1)).timestamp());
    }
    bail!("local time {naive} cannot be mapped to an instant");
}

fn naive_from_digits(s: &str) -> Result<NaiveDateTime> {
    let year: i32 = s[0..4].parse()?;
    let month: u32 = s[4..6].parse()?;
    let day: u32 = s[6..8].parse()?;
    let hour: u32 = s[8..10].parse()?;
    let min: u32 = s[10..12].parse()?;
    let sec: u32 = s[12..14].parse()?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, min, sec))
        .with_context(|| format!("invalid calendar fields in {s:?}"))
}
