//! Timestamp helpers.
//!
//! All persisted timestamps are UTC RFC 3339 strings with microsecond
//! precision and a `Z` suffix. The width is fixed so lexicographic
//! comparison in SQL (`expires_at <= ?1`) equals chronological comparison.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::error::MintError;

/// Format a timestamp for storage.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, MintError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MintError::Serialization(format!("bad timestamp {s:?}: {e}")))
}

/// The UTC calendar date of a timestamp.
pub fn utc_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// The UTC calendar date as stored by `date(...)` in SQLite (`YYYY-MM-DD`).
pub fn utc_date_str(ts: DateTime<Utc>) -> String {
    ts.date_naive().format("%Y-%m-%d").to_string()
}

/// Timestamp suffix for backup file names (`YYYYMMDD_HHMMSS`).
pub fn backup_suffix(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d_%H%M%S").to_string()
}
