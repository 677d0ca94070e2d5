//! Best-effort parsing of free-text event fields.
//!
//! None of these functions fail: when nothing can be recognized they return
//! an empty string (or `None`) and the record keeps whatever raw text it had.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc,
};
use once_cell::sync::Lazy;
use regex::Regex;

/// Availability phrases, checked in order, case-insensitively.
const CAPACITY_KEYWORDS: &[&str] = &[
    "Sold out",
    "Selling fast",
    "Few tickets left",
    "Limited spots",
    "Almost full",
    "Waitlist",
];

static SPOTS_LEFT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(spots?|seats?|tickets?|places?)\s+(left|remaining)\b").unwrap()
});

static TIME_12H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:[:.](\d{2}))?\s*([ap])\.?m\.?\b").unwrap());

static TIME_24H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d)\b").unwrap());

/// Full month names and their usual abbreviations, as one capture group.
macro_rules! month_names {
    () => {
        concat!(
            r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?",
            r"|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)"
        )
    };
}

static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+",
        month_names!(),
        r"\b\.?,?(?:\s+(\d{4})\b)?"
    ))
    .unwrap()
});

static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b",
        month_names!(),
        r"\b\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s+(\d{4}))?"
    ))
    .unwrap()
});

/// Capacity status found in `text`, or an empty string.
pub fn capacity_status(text: &str) -> String {
    let lower = text.to_lowercase();
    if let Some(kw) = CAPACITY_KEYWORDS.iter().find(|kw| lower.contains(&kw.to_lowercase())) {
        return kw.to_string();
    }
    SPOTS_LEFT
        .find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// The offset for `hours` east of UTC, falling back to UTC when out of range.
///
/// Configured offsets are checked against [`MAX_OFFSET_HOURS`] at load time.
pub fn offset_hours(hours: i32) -> FixedOffset {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

/// Largest whole-hour distance from UTC accepted in configuration.
pub const MAX_OFFSET_HOURS: i32 = 23;

fn format_minutes(dt: DateTime<FixedOffset>) -> String {
    dt.format("%Y-%m-%dT%H:%M%:z").to_string()
}

fn localize(naive: NaiveDateTime, offset: FixedOffset) -> Option<String> {
    offset.from_local_datetime(&naive).single().map(format_minutes)
}

/// Normalize an ISO-like timestamp to `YYYY-MM-DDTHH:MM±HH:MM` in `offset`.
///
/// Accepts `2026-03-15T10:00`, `2026-03-15T10:00:00`, `2026-03-15 10:00`,
/// and any of these with a `Z` or `±HH:MM` suffix. Timestamps without an
/// offset are taken to be in `offset` already.
pub fn normalize_datetime(text: &str, offset: FixedOffset) -> Option<String> {
    let s = text.trim().replacen(' ', "T", 1);
    if s.is_empty() {
        return None;
    }
    let s = match s.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => s,
    };

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%dT%H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&s, fmt) {
            return Some(format_minutes(dt.with_timezone(&offset)));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, fmt) {
            return localize(naive, offset);
        }
    }
    None
}

fn month_number(name: &str) -> Option<u32> {
    let key = name.get(..3)?.to_ascii_lowercase();
    let months = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    months.iter().position(|m| *m == key).map(|i| i as u32 + 1)
}

fn time_of(text: &str) -> NaiveTime {
    if let Some(c) = TIME_12H.captures(text) {
        let hour: u32 = c[1].parse().unwrap_or(0);
        let minute: u32 = c.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let pm = c[3].eq_ignore_ascii_case("p");
        let hour = match (hour % 12, pm) {
            (h, true) => h + 12,
            (h, false) => h,
        };
        if let Some(t) = NaiveTime::from_hms_opt(hour, minute, 0) {
            return t;
        }
    }
    if let Some(c) = TIME_24H.captures(text) {
        let hour: u32 = c[1].parse().unwrap_or(0);
        let minute: u32 = c[2].parse().unwrap_or(0);
        if let Some(t) = NaiveTime::from_hms_opt(hour, minute, 0) {
            return t;
        }
    }
    NaiveTime::MIN
}

/// Resolve a day/month pair, assuming the next occurrence when no year is given.
fn resolve_date(day: u32, month: u32, year: Option<i32>, today: NaiveDate) -> Option<NaiveDate> {
    match year {
        Some(y) => NaiveDate::from_ymd_opt(y, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year < today {
                NaiveDate::from_ymd_opt(today.year() + 1, month, day)
            } else {
                Some(this_year)
            }
        }
    }
}

fn date_of(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = text.to_lowercase();
    if lower.contains("today") || lower.contains("tonight") {
        return Some(today);
    }
    if lower.contains("tomorrow") {
        return Some(today + Duration::days(1));
    }

    for c in DAY_MONTH.captures_iter(text) {
        if let Some(month) = month_number(&c[2]) {
            let day: u32 = c[1].parse().ok()?;
            let year = c.get(3).and_then(|y| y.as_str().parse().ok());
            if let Some(d) = resolve_date(day, month, year, today) {
                return Some(d);
            }
        }
    }
    for c in MONTH_DAY.captures_iter(text) {
        if let Some(month) = month_number(&c[1]) {
            let day: u32 = c[2].parse().ok()?;
            let year = c.get(3).and_then(|y| y.as_str().parse().ok());
            if let Some(d) = resolve_date(day, month, year, today) {
                return Some(d);
            }
        }
    }
    None
}

/// Turn a human date such as "Sat, 15 Mar 2026 · 7:30 PM" into an ISO start.
///
/// Tries [`normalize_datetime`] first. Dates without a year resolve to their
/// next occurrence on or after `today`; a missing time means midnight.
pub fn parse_date_text(text: &str, offset: FixedOffset, today: NaiveDate) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(iso) = normalize_datetime(text, offset) {
        return Some(iso);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return localize(date.and_time(NaiveTime::MIN), offset);
    }

    let date = date_of(text, today)?;
    localize(date.and_time(time_of(text)), offset)
}
