//! Schedule-literal parsing.
//!
//! One-time jobs accept either a relative offset (`in 30s`, `+1h`, `5m`) or
//! an absolute timestamp in a handful of layouts, with a numeric UTC offset,
//! a zone abbreviation, or an IANA zone name suffix.

use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::errors::{Error, Result};

/// Absolute layouts carrying a numeric offset, e.g. `-0700`.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S %z",
    "%m/%d/%Y %I:%M %p %z",
    "%b %e, %Y %I:%M %p %z",
];

/// The same layouts without zone information, resolved against a named zone.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %I:%M %p",
    "%b %e, %Y %I:%M %p",
];

/// Parse a schedule literal into an absolute UTC instant.
///
/// Forms are tried in order: relative offset, RFC-3339, offset layouts,
/// zone-suffixed layouts. Anything else is an invalid schedule.
pub fn parse_schedule(literal: &str) -> Result<DateTime<Utc>> {
    let s = literal.trim();
    if s.is_empty() {
        return Err(Error::InvalidSchedule("empty schedule literal".to_string()));
    }

    if let Some(t) = parse_relative(s) {
        return Ok(t);
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(t) = DateTime::parse_from_str(s, format) {
            return Ok(t.with_timezone(&Utc));
        }
    }

    if let Some(t) = parse_with_zone_suffix(s) {
        return Ok(t);
    }

    Err(Error::InvalidSchedule(format!(
        "unsupported time format: {}",
        s
    )))
}

/// Relative forms: `in <duration>`, `+<duration>`, or a bare duration.
fn parse_relative(s: &str) -> Option<DateTime<Utc>> {
    let lower = s.to_ascii_lowercase();
    let duration = if let Some(rest) = lower.strip_prefix("in ") {
        parse_duration_literal(rest.trim())?
    } else if let Some(rest) = lower.strip_prefix('+') {
        parse_duration_literal(rest)?
    } else {
        parse_duration_literal(&lower)?
    };
    let offset = chrono::Duration::from_std(duration).ok()?;
    Utc::now().checked_add_signed(offset)
}

/// Parse a compound duration literal such as `30s`, `300ms`, `1h30m`, `2.5h`.
///
/// Units: `ms`, `s`, `m`, `h`, `d`. A unit is required on every segment, so
/// bare numbers (which could be the year of a date) never parse.
pub fn parse_duration_literal(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if number_end == 0 {
            return None;
        }
        let value: f64 = rest[..number_end].parse().ok()?;
        let after_number = &rest[number_end..];
        // "ms" must be checked before the bare "m" minute suffix
        let (seconds_per_unit, unit_len) = if after_number.starts_with("ms") {
            (0.001, 2)
        } else if after_number.starts_with('s') {
            (1.0, 1)
        } else if after_number.starts_with('m') {
            (60.0, 1)
        } else if after_number.starts_with('h') {
            (3_600.0, 1)
        } else if after_number.starts_with('d') {
            (86_400.0, 1)
        } else {
            return None;
        };
        total += Duration::from_secs_f64(value * seconds_per_unit);
        rest = &after_number[unit_len..];
    }

    Some(total)
}

/// Zone abbreviations the parser recognises, mapped to IANA zones. The
/// abbreviation only selects the zone; the actual offset is resolved from
/// the timestamp itself (so a `PST` stamp in July resolves to the PDT
/// offset).
fn zone_from_abbreviation(abbr: &str) -> Option<Tz> {
    let tz = match abbr.to_ascii_uppercase().as_str() {
        "PST" | "PDT" => chrono_tz::America::Los_Angeles,
        "MST" | "MDT" => chrono_tz::America::Denver,
        "CST" | "CDT" => chrono_tz::America::Chicago,
        "EST" | "EDT" => chrono_tz::America::New_York,
        "GMT" | "BST" => chrono_tz::Europe::London,
        "UTC" => chrono_tz::UTC,
        _ => return None,
    };
    Some(tz)
}

/// Handle `<timestamp> <zone>` where the zone is an IANA name like
/// `America/New_York` or a known abbreviation like `PST`.
fn parse_with_zone_suffix(s: &str) -> Option<DateTime<Utc>> {
    let (head, last) = s.rsplit_once(' ')?;
    let tz: Tz = last
        .parse()
        .ok()
        .or_else(|| zone_from_abbreviation(last))?;

    for format in NAIVE_FORMATS {
        let Ok(naive) = NaiveDateTime::parse_from_str(head.trim(), format) else {
            continue;
        };
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => return Some(t.with_timezone(&Utc)),
            // DST fall-back: the earlier of the two wall-clock matches
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
            // DST spring-forward gap: no such wall-clock time in this zone
            LocalResult::None => continue,
        }
    }
    None
}

/// Render a cron expression as human-readable text. Handles the common
/// 5-/6-field patterns; anything unrecognised comes back verbatim.
/// Purely presentational.
pub fn cron_to_english(expr: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    let (second, minute, hour, day, month, weekday) = match parts.as_slice() {
        [sec, min, hr, dom, mon, dow] => (*sec, *min, *hr, *dom, *mon, *dow),
        [min, hr, dom, mon, dow] => ("0", *min, *hr, *dom, *mon, *dow),
        _ => return expr.to_string(),
    };

    let wildcard_calendar = day == "*" && month == "*" && weekday == "*";

    if wildcard_calendar && minute == "*" && hour == "*" {
        if second == "*" {
            return "Every second".to_string();
        }
        if let Some(n) = second.strip_prefix("*/") {
            return format!("Every {} seconds", n);
        }
        if second == "0" {
            return "Every minute".to_string();
        }
    }

    if wildcard_calendar && second == "0" && hour == "*" {
        if minute == "*" {
            return "Every minute".to_string();
        }
        if let Some(n) = minute.strip_prefix("*/") {
            return format!("Every {} minutes", n);
        }
    }

    if wildcard_calendar && second == "0" {
        if minute == "0" && hour == "*" {
            return "Every hour".to_string();
        }
        if let Some(n) = hour.strip_prefix("*/") {
            if minute == "0" {
                return format!("Every {} hours", n);
            }
        }
        if let (Ok(m), Ok(h)) = (minute.parse::<u32>(), hour.parse::<u32>()) {
            return format!("Daily at {:02}:{:02}", h, m);
        }
    }

    expr.to_string()
}
