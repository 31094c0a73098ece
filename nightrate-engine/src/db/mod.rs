//! Database access for nightrate-engine
//!
//! Dates are stored as `YYYY-MM-DD` text and instants as RFC 3339 text.

pub mod features;
pub mod groups;
pub mod model_metrics;
pub mod observations;
pub mod overrides;
pub mod properties;
pub mod quota;
pub mod scheduler_state;
pub mod settings;

use chrono::{DateTime, NaiveDate, Utc};
use nightrate_common::{Error, Result};

/// Deadline for lock retries on engine batch writes
pub const UPSERT_DEADLINE_MS: u64 = 10_000;

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::Internal(format!("Invalid stored date {:?}: {}", value, e)))
}

pub(crate) fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339()
}

pub(crate) fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid stored instant {:?}: {}", value, e)))
}

pub(crate) fn parse_optional_instant(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse_instant(&v))
        .transpose()
}
