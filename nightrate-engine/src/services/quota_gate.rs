//! Daily LLM quota gate
//!
//! Increment and compensation form a saga around the LLM call: admitted calls
//! that fail technically are decremented once; exhausted calls never touched
//! the counter and are never decremented. Rows are keyed by the UTC date.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use nightrate_common::Result;

use crate::db::quota;
use crate::models::{QuotaDecision, QuotaUsage};

#[derive(Clone)]
pub struct QuotaGate {
    pool: SqlitePool,
}

impl QuotaGate {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn quota_date(now: DateTime<Utc>) -> NaiveDate {
        now.date_naive()
    }

    /// Admit one call if the user is below both caps of their current plan
    pub async fn check_and_increment(&self, user_id: &str, now: DateTime<Utc>) -> Result<QuotaDecision> {
        let status = quota::subscription_status(&self.pool, user_id).await?;
        let caps = status.caps();
        let date = Self::quota_date(now);

        if quota::increment_if_below(&self.pool, user_id, date, caps, 0).await? {
            let usage = quota::get_usage(&self.pool, user_id, date).await?;
            let remaining = (caps.max_calls - usage.calls_count).max(0);
            debug!(user_id, ?status, remaining, "LLM quota admitted");
            Ok(QuotaDecision::Admitted { remaining })
        } else {
            info!(user_id, ?status, max_calls = caps.max_calls, "LLM quota exhausted");
            Ok(QuotaDecision::Exhausted)
        }
    }

    /// Undo one admitted call after a technical failure
    pub async fn compensate(&self, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        quota::decrement(&self.pool, user_id, Self::quota_date(now)).await
    }

    pub async fn record_tokens(&self, user_id: &str, now: DateTime<Utc>, tokens: i64) -> Result<()> {
        quota::add_tokens(&self.pool, user_id, Self::quota_date(now), tokens).await
    }

    pub async fn usage(&self, user_id: &str, now: DateTime<Utc>) -> Result<QuotaUsage> {
        quota::get_usage(&self.pool, user_id, Self::quota_date(now)).await
    }
}
