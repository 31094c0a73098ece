//! Demand model: per-property regression served by a worker process
//!
//! The engine never loads models itself. It talks to a [`DemandOracle`]; in
//! production that is the [`bridge::DemandBridge`] actor owning the
//! `nightrate-demand-worker` child process.

pub mod bridge;
pub mod model;
pub mod protocol;
pub mod training;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BridgeError;
use crate::models::MarketFeatures;

pub use bridge::{BridgeConfig, DemandBridge};

/// Inputs describing one night, independent of the candidate price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFeatures {
    pub date: NaiveDate,
    pub lead_days: i64,
    pub weather_score: Option<f64>,
    pub expected_demand_impact: Option<f64>,
    pub market_trend_score: Option<f64>,
    pub competitor_avg_price: Option<f64>,
}

impl ContextFeatures {
    pub fn for_night(date: NaiveDate, today: NaiveDate, features: Option<&MarketFeatures>) -> Self {
        Self {
            date,
            lead_days: (date - today).num_days().max(0),
            weather_score: features.and_then(|f| f.weather_score),
            expected_demand_impact: features.and_then(|f| f.expected_demand_impact),
            market_trend_score: features.and_then(|f| f.market_trend_score),
            competitor_avg_price: features.and_then(|f| f.competitor_avg()),
        }
    }
}

/// One historical night: the price shown and the bookings it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub price: f64,
    pub bookings: f64,
    pub lead_days: i64,
    pub weather_score: Option<f64>,
    pub expected_demand_impact: Option<f64>,
    pub market_trend_score: Option<f64>,
    pub competitor_avg_price: Option<f64>,
}

impl Observation {
    pub fn context(&self) -> ContextFeatures {
        ContextFeatures {
            date: self.date,
            lead_days: self.lead_days,
            weather_score: self.weather_score,
            expected_demand_impact: self.expected_demand_impact,
            market_trend_score: self.market_trend_score,
            competitor_avg_price: self.competitor_avg_price,
        }
    }
}

/// Demand and revenue at one grid price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub price: f64,
    pub predicted_demand: f64,
    pub expected_revenue: f64,
}

/// Best grid price with the model's confidence in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevenueOptimum {
    pub price: f64,
    pub predicted_demand: f64,
    pub expected_revenue: f64,
    pub confidence: f64,
}

/// Result of a training request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    /// The artifact was written (first model or RMSE improved by ≥ 5 %)
    pub replaced: bool,
    /// Version of the artifact now in place (0 when none exists)
    pub version: i64,
    /// Validation RMSE of the candidate model
    pub val_rmse: f64,
    pub trained_at: DateTime<Utc>,
    pub feature_importance: BTreeMap<String, f64>,
}

/// Demand model contract used by the orchestrator and scheduler
///
/// Every error is benign for pricing: callers fall back to the baseline.
#[async_trait]
pub trait DemandOracle: Send + Sync {
    async fn has_model(&self, property_id: &str) -> Result<bool, BridgeError>;

    async fn predict_demand(
        &self,
        property_id: &str,
        context: &ContextFeatures,
        price: f64,
    ) -> Result<f64, BridgeError>;

    async fn optimize(
        &self,
        property_id: &str,
        context: &ContextFeatures,
        capacity_remaining: f64,
        price_grid: &[f64],
    ) -> Result<Vec<GridPoint>, BridgeError>;

    async fn argmax_revenue(
        &self,
        property_id: &str,
        context: &ContextFeatures,
        price_grid: &[f64],
    ) -> Result<RevenueOptimum, BridgeError>;

    async fn train(
        &self,
        property_id: &str,
        observations: &[Observation],
    ) -> Result<TrainOutcome, BridgeError>;
}
