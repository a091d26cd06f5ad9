// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and calendar-day math.
//!
//! All "calendar day" decisions (daily limits, streaks, dedup keys, fraud
//! windows) use a single platform reference offset so the same instant never
//! lands on two different days depending on the code path.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Calendar day of a UTC instant in the platform reference timezone.
pub fn local_day(ts: DateTime<Utc>, utc_offset_hours: i32) -> NaiveDate {
    (ts + Duration::hours(i64::from(utc_offset_hours))).date_naive()
}

/// Local hour (0-23) of a UTC instant in the platform reference timezone.
pub fn local_hour(ts: DateTime<Utc>, utc_offset_hours: i32) -> u32 {
    use chrono::Timelike;
    (ts + Duration::hours(i64::from(utc_offset_hours))).hour()
}

/// Canonical day key ("YYYY-MM-DD") used in document ids and dedup keys.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Parse a canonical day key back to a date.
pub fn parse_day_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}
