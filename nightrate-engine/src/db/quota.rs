//! `user_ai_usage` counters
//!
//! Admission is one conditional `UPDATE`; zero affected rows means the cap is
//! reached. Nothing here reads-then-writes.

use chrono::NaiveDate;
use nightrate_common::Result;
use sqlx::{Row, SqlitePool};

use crate::db::format_date;
use crate::models::{QuotaCaps, QuotaUsage, SubscriptionStatus};

/// Billing status of a user; unknown users count as `none`
pub async fn subscription_status(pool: &SqlitePool, user_id: &str) -> Result<SubscriptionStatus> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT subscription_status FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(status
        .map(|s| SubscriptionStatus::parse_lenient(&s))
        .unwrap_or_default())
}

/// Increment `calls_count` when below both caps; `true` when admitted
pub async fn increment_if_below(
    pool: &SqlitePool,
    user_id: &str,
    date: NaiveDate,
    caps: QuotaCaps,
    tokens: i64,
) -> Result<bool> {
    let date = format_date(date);

    sqlx::query("INSERT OR IGNORE INTO user_ai_usage (user_id, date, calls_count, tokens_used) VALUES (?, ?, 0, 0)")
        .bind(user_id)
        .bind(&date)
        .execute(pool)
        .await?;

    let result = sqlx::query(
        r#"
        UPDATE user_ai_usage
        SET calls_count = calls_count + 1, tokens_used = tokens_used + ?
        WHERE user_id = ? AND date = ? AND calls_count < ? AND tokens_used < ?
        "#,
    )
    .bind(tokens.max(0))
    .bind(user_id)
    .bind(&date)
    .bind(caps.max_calls)
    .bind(caps.max_tokens)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Compensating decrement after a technical LLM failure
pub async fn decrement(pool: &SqlitePool, user_id: &str, date: NaiveDate) -> Result<()> {
    sqlx::query(
        "UPDATE user_ai_usage SET calls_count = calls_count - 1 WHERE user_id = ? AND date = ? AND calls_count > 0",
    )
    .bind(user_id)
    .bind(format_date(date))
    .execute(pool)
    .await?;
    Ok(())
}

/// Add tokens reported by a successful call
pub async fn add_tokens(pool: &SqlitePool, user_id: &str, date: NaiveDate, tokens: i64) -> Result<()> {
    if tokens <= 0 {
        return Ok(());
    }
    sqlx::query("UPDATE user_ai_usage SET tokens_used = tokens_used + ? WHERE user_id = ? AND date = ?")
        .bind(tokens)
        .bind(user_id)
        .bind(format_date(date))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_usage(pool: &SqlitePool, user_id: &str, date: NaiveDate) -> Result<QuotaUsage> {
    let row = sqlx::query("SELECT calls_count, tokens_used FROM user_ai_usage WHERE user_id = ? AND date = ?")
        .bind(user_id)
        .bind(format_date(date))
        .fetch_optional(pool)
        .await?;

    Ok(row
        .map(|row| QuotaUsage {
            calls_count: row.get("calls_count"),
            tokens_used: row.get("tokens_used"),
        })
        .unwrap_or_default())
}

/// Drop rows older than `keep_from` (rotation)
pub async fn purge_before(pool: &SqlitePool, keep_from: NaiveDate) -> Result<u64> {
    let result = sqlx::query("DELETE FROM user_ai_usage WHERE date < ?")
        .bind(format_date(keep_from))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
