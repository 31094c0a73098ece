//! Demand model training metrics

use chrono::{DateTime, Utc};
use nightrate_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::db::{format_instant, parse_instant};

/// One accepted training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub property_id: String,
    pub model_version: i64,
    pub val_rmse: f64,
    pub trained_at: DateTime<Utc>,
    pub feature_importance: BTreeMap<String, f64>,
}

pub async fn insert_metrics(pool: &SqlitePool, metrics: &ModelMetrics) -> Result<()> {
    let importance = serde_json::to_string(&metrics.feature_importance)
        .map_err(|e| Error::Internal(format!("Failed to serialize feature importance: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO pricing_model_metrics (property_id, model_version, val_rmse, trained_at, feature_importance)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&metrics.property_id)
    .bind(metrics.model_version)
    .bind(metrics.val_rmse)
    .bind(format_instant(metrics.trained_at))
    .bind(importance)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent metrics row for a property
pub async fn latest_metrics(pool: &SqlitePool, property_id: &str) -> Result<Option<ModelMetrics>> {
    let row = sqlx::query(
        r#"
        SELECT property_id, model_version, val_rmse, trained_at, feature_importance
        FROM pricing_model_metrics
        WHERE property_id = ?
        ORDER BY trained_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(property_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let trained_at: String = row.get("trained_at");
            let importance: String = row.get("feature_importance");
            Ok(Some(ModelMetrics {
                property_id: row.get("property_id"),
                model_version: row.get("model_version"),
                val_rmse: row.get("val_rmse"),
                trained_at: parse_instant(&trained_at)?,
                feature_importance: serde_json::from_str(&importance).map_err(|e| {
                    Error::Internal(format!("Invalid stored feature importance: {}", e))
                })?,
            }))
        }
        None => Ok(None),
    }
}
