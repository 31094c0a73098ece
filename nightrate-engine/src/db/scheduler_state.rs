//! Per-subject auto-pricing state

use chrono::{DateTime, Utc};
use nightrate_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::db::{format_instant, parse_optional_instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Property,
    Group,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Property => "property",
            SubjectKind::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub failed_attempts: i64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_successful_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub async fn get_state(
    pool: &SqlitePool,
    kind: SubjectKind,
    subject_id: &str,
) -> Result<SchedulerState> {
    let row = sqlx::query(
        r#"
        SELECT failed_attempts, last_attempt, last_successful_run, last_error
        FROM auto_pricing_state WHERE subject_kind = ? AND subject_id = ?
        "#,
    )
    .bind(kind.as_str())
    .bind(subject_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(SchedulerState {
            failed_attempts: row.get("failed_attempts"),
            last_attempt: parse_optional_instant(row.get("last_attempt"))?,
            last_successful_run: parse_optional_instant(row.get("last_successful_run"))?,
            last_error: row.get("last_error"),
        }),
        None => Ok(SchedulerState::default()),
    }
}

/// Reset the failure counter and stamp the success
pub async fn record_success(
    pool: &SqlitePool,
    kind: SubjectKind,
    subject_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let now = format_instant(now);
    sqlx::query(
        r#"
        INSERT INTO auto_pricing_state (subject_kind, subject_id, failed_attempts, last_attempt, last_successful_run, last_error)
        VALUES (?, ?, 0, ?, ?, NULL)
        ON CONFLICT(subject_kind, subject_id) DO UPDATE SET
            failed_attempts = 0,
            last_attempt = excluded.last_attempt,
            last_successful_run = excluded.last_successful_run,
            last_error = NULL
        "#,
    )
    .bind(kind.as_str())
    .bind(subject_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Increment the failure counter and stamp the attempt
pub async fn record_failure(
    pool: &SqlitePool,
    kind: SubjectKind,
    subject_id: &str,
    now: DateTime<Utc>,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO auto_pricing_state (subject_kind, subject_id, failed_attempts, last_attempt, last_error)
        VALUES (?, ?, 1, ?, ?)
        ON CONFLICT(subject_kind, subject_id) DO UPDATE SET
            failed_attempts = auto_pricing_state.failed_attempts + 1,
            last_attempt = excluded.last_attempt,
            last_error = excluded.last_error
        "#,
    )
    .bind(kind.as_str())
    .bind(subject_id)
    .bind(format_instant(now))
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}
