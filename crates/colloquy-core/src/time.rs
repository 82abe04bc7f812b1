// ABOUTME: Fixed-width RFC 3339 timestamps at microsecond precision
// ABOUTME: Lexical order of the encoded form equals chronological order
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Timestamps are persisted as `YYYY-MM-DDTHH:MM:SS.ffffffZ`. Every value has
//! the same width, so string comparison in SQL orders rows chronologically.

use chrono::{DateTime, Duration, DurationRound, NaiveDateTime, Utc};

use crate::errors::{AppError, AppResult};

const STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Current instant truncated to microseconds
#[must_use]
pub fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}

/// Drop sub-microsecond precision
#[must_use]
pub fn truncate(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(Duration::microseconds(1))
        .unwrap_or(instant)
}

/// Encode for storage
#[must_use]
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(STORAGE_FORMAT).to_string()
}

/// Decode a stored timestamp
///
/// # Errors
///
/// Returns an error if the value is not in the storage format
pub fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, STORAGE_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| AppError::database(format!("Invalid stored timestamp '{value}': {e}")))
}

/// Stamp for a new row that must sort strictly after `last`
#[must_use]
pub fn next_after(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = truncate(now);
    match last {
        Some(last) if last >= now => last + Duration::microseconds(1),
        _ => now,
    }
}
