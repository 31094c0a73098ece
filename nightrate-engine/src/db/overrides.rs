//! Override store
//!
//! Engine writes go through a per-row lock predicate:
//! `INSERT … ON CONFLICT DO UPDATE … WHERE locked = 0`. A row locked by a
//! manual edit at any point before the batch commits is skipped, never
//! overwritten. Manual writes bypass the predicate.

use chrono::{DateTime, NaiveDate, Utc};
use nightrate_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool, Transaction};

use crate::db::{format_date, format_instant, groups, parse_date, parse_instant, UPSERT_DEADLINE_MS};
use crate::models::{OverrideWrite, PriceOverride, UpsertReport};
use crate::utils::retry_on_lock;

fn override_from_row(row: &SqliteRow) -> Result<PriceOverride> {
    let date: String = row.get("date");
    let updated_at: String = row.get("updated_at");
    let locked: i64 = row.get("locked");
    Ok(PriceOverride {
        property_id: row.get("property_id"),
        date: parse_date(&date)?,
        price: row.get("price"),
        reason: row.get("reason"),
        locked: locked != 0,
        updated_by: row.get("updated_by"),
        updated_at: parse_instant(&updated_at)?,
    })
}

/// Lock-respecting batch upsert inside a caller-owned transaction
pub async fn upsert_unlocked_batch(
    tx: &mut Transaction<'_, Sqlite>,
    property_id: &str,
    rows: &[OverrideWrite],
    updated_by: &str,
    now: DateTime<Utc>,
) -> Result<UpsertReport> {
    let updated_at = format_instant(now);
    let mut report = UpsertReport::default();

    for row in rows {
        if row.price <= 0 {
            return Err(Error::InvalidInput(format!(
                "Price for {} on {} must be positive, got {}",
                property_id, row.date, row.price
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO price_overrides (property_id, date, price, reason, locked, updated_by, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(property_id, date) DO UPDATE SET
                price = excluded.price,
                reason = excluded.reason,
                updated_by = excluded.updated_by,
                updated_at = excluded.updated_at
            WHERE price_overrides.locked = 0
            "#,
        )
        .bind(property_id)
        .bind(format_date(row.date))
        .bind(row.price)
        .bind(&row.reason)
        .bind(updated_by)
        .bind(&updated_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            report.skipped_locked.push(row.date);
        } else {
            report.written.push(row.date);
        }
    }

    Ok(report)
}

async fn persist_run_once(
    pool: &SqlitePool,
    property_id: &str,
    group_id: Option<&str>,
    rows: &[OverrideWrite],
    updated_by: &str,
    now: DateTime<Utc>,
) -> Result<UpsertReport> {
    let mut tx = pool.begin().await?;

    let report = upsert_unlocked_batch(&mut tx, property_id, rows, updated_by, now).await?;

    sqlx::query("UPDATE properties SET last_pricing_update = ? WHERE id = ?")
        .bind(format_instant(now))
        .bind(property_id)
        .execute(&mut *tx)
        .await?;

    if let Some(group_id) = group_id {
        groups::set_last_pricing_update(&mut tx, group_id, now).await?;
    }

    tx.commit().await?;
    Ok(report)
}

/// Atomic PERSIST of one run
///
/// Writes every non-locked row and stamps `last_pricing_update` on the
/// property (and on `group_id` when the property is a group's main) in one
/// transaction. Either all of it is visible or none of it.
pub async fn persist_run(
    pool: &SqlitePool,
    property_id: &str,
    group_id: Option<&str>,
    rows: &[OverrideWrite],
    updated_by: &str,
    now: DateTime<Utc>,
) -> Result<UpsertReport> {
    retry_on_lock("persist_run", UPSERT_DEADLINE_MS, || {
        persist_run_once(pool, property_id, group_id, rows, updated_by, now)
    })
    .await
}

async fn upsert_batch_once(
    pool: &SqlitePool,
    property_id: &str,
    rows: &[OverrideWrite],
    updated_by: &str,
    now: DateTime<Utc>,
) -> Result<UpsertReport> {
    let mut tx = pool.begin().await?;
    let report = upsert_unlocked_batch(&mut tx, property_id, rows, updated_by, now).await?;
    tx.commit().await?;
    Ok(report)
}

/// Standalone lock-respecting batch for one property (group members)
pub async fn upsert_batch(
    pool: &SqlitePool,
    property_id: &str,
    rows: &[OverrideWrite],
    updated_by: &str,
    now: DateTime<Utc>,
) -> Result<UpsertReport> {
    retry_on_lock("upsert_batch", UPSERT_DEADLINE_MS, || {
        upsert_batch_once(pool, property_id, rows, updated_by, now)
    })
    .await
}

/// Manual write: may change or lock any row, locked or not
#[allow(clippy::too_many_arguments)]
pub async fn set_manual_override(
    pool: &SqlitePool,
    property_id: &str,
    date: NaiveDate,
    price: i64,
    reason: &str,
    locked: bool,
    user: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if price <= 0 {
        return Err(Error::InvalidInput(format!(
            "Price must be positive, got {}",
            price
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO price_overrides (property_id, date, price, reason, locked, updated_by, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(property_id, date) DO UPDATE SET
            price = excluded.price,
            reason = excluded.reason,
            locked = excluded.locked,
            updated_by = excluded.updated_by,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(property_id)
    .bind(format_date(date))
    .bind(price)
    .bind(reason)
    .bind(locked as i64)
    .bind(user)
    .bind(format_instant(now))
    .execute(pool)
    .await?;

    tracing::info!(property_id, date = %date, price, locked, user, "Manual override saved");
    Ok(())
}

/// Clear the lock on one row; the price stays until the next engine run
pub async fn unlock_override(
    pool: &SqlitePool,
    property_id: &str,
    date: NaiveDate,
    user: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE price_overrides SET locked = 0, updated_by = ?, updated_at = ? WHERE property_id = ? AND date = ?",
    )
    .bind(user)
    .bind(format_instant(now))
    .bind(property_id)
    .bind(format_date(date))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "Override for {} on {}",
            property_id, date
        )));
    }
    Ok(())
}

pub async fn get_override(
    pool: &SqlitePool,
    property_id: &str,
    date: NaiveDate,
) -> Result<Option<PriceOverride>> {
    let row = sqlx::query(
        r#"
        SELECT property_id, date, price, reason, locked, updated_by, updated_at
        FROM price_overrides WHERE property_id = ? AND date = ?
        "#,
    )
    .bind(property_id)
    .bind(format_date(date))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(override_from_row).transpose()
}

/// Rows for `property_id` within `[start, end]`, in date order
pub async fn get_overrides(
    pool: &SqlitePool,
    property_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PriceOverride>> {
    let rows = sqlx::query(
        r#"
        SELECT property_id, date, price, reason, locked, updated_by, updated_at
        FROM price_overrides
        WHERE property_id = ? AND date >= ? AND date <= ?
        ORDER BY date
        "#,
    )
    .bind(property_id)
    .bind(format_date(start))
    .bind(format_date(end))
    .fetch_all(pool)
    .await?;
    rows.iter().map(override_from_row).collect()
}
