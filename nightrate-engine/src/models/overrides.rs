//! Stored per-day prices

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// `updated_by` value for engine writes without a triggering user
pub const SYSTEM_USER: &str = "system";

/// Stored price for one `(property, date)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub property_id: String,
    pub date: NaiveDate,
    pub price: i64,
    pub reason: String,
    /// Locked rows are fixed points for engine writes
    pub locked: bool,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// One row of an engine batch upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideWrite {
    pub date: NaiveDate,
    pub price: i64,
    pub reason: String,
}

/// Outcome of a lock-respecting batch upsert
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    /// Dates actually written
    pub written: Vec<NaiveDate>,
    /// Dates skipped because the row is locked
    pub skipped_locked: Vec<NaiveDate>,
}
