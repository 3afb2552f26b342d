//! Compact `YYYYMMDD` date strings.
//!
//! Every date that crosses a crate boundary (watermarks, partition columns,
//! provider windows) uses the 8-digit form, so ordering by string equals
//! ordering by date.

use chrono::{Duration, NaiveDate};

const COMPACT: &str = "%Y%m%d";

/// Strip `-`, `/` and `.` separators and keep the first 8 characters.
///
/// `"2023-01-05"`, `"2023/01/05"` and `"20230105"` all become `"20230105"`.
pub fn normalize_date(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '/' | '.'))
        .take(8)
        .collect()
}

/// Parse a date in any separator style into a `NaiveDate`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let compact = normalize_date(value);
    if compact.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(&compact, COMPACT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(COMPACT).to_string()
}

/// The calendar day after `value`. Input that is not a valid date is returned unchanged.
pub fn next_day(value: &str) -> String {
    match parse_date(value) {
        Some(date) => format_date(date + Duration::days(1)),
        None => value.to_string(),
    }
}

/// Partition year of a normalized date: its first four characters, if they are digits.
pub fn partition_year(value: &str) -> Option<&str> {
    let year = value.get(0..4)?;
    year.bytes().all(|b| b.is_ascii_digit()).then_some(year)
}
