//! Read-only market feature lookup

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use nightrate_common::Result;

use crate::db::features::features_in_range;
use crate::models::{Location, MarketFeatures};

/// Deadline for one horizon lookup
pub const FEATURE_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Rows for `location` between `start` and `end` inclusive, keyed by date
    async fn features_for(
        &self,
        location: &Location,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<NaiveDate, MarketFeatures>>;
}

/// Features from the local `market_features` table
pub struct SqliteFeatureSource {
    pool: SqlitePool,
}

impl SqliteFeatureSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeatureSource for SqliteFeatureSource {
    async fn features_for(
        &self,
        location: &Location,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<NaiveDate, MarketFeatures>> {
        let rows = features_in_range(&self.pool, &location.country, &location.city, start, end).await?;
        Ok(rows.into_iter().map(|f| (f.date, f)).collect())
    }
}
