//! Pre-aggregated daily market features per (city, country, date)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Minimum data quality for the event signal to be trusted
pub const MIN_TRUSTED_QUALITY: f64 = 0.4;

/// One row of the market feature store; every signal is nullable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketFeatures {
    pub city: String,
    pub country: String,
    pub date: NaiveDate,
    pub competitor_avg_price: Option<f64>,
    pub competitor_min_price: Option<f64>,
    pub competitor_max_price: Option<f64>,
    pub competitor_p50_price: Option<f64>,
    pub sample_size: Option<i64>,
    /// 0..=100
    pub weather_score: Option<f64>,
    /// -100..=100
    pub expected_demand_impact: Option<f64>,
    /// -1..=1
    pub market_trend_score: Option<f64>,
    pub has_major_event: bool,
    pub event_count: i64,
    /// 0..=1, trust weight when blending
    pub data_quality_score: Option<f64>,
}

impl MarketFeatures {
    /// Quality score clamped to [0, 1]; missing counts as 0
    pub fn quality(&self) -> f64 {
        self.data_quality_score.unwrap_or(0.0).clamp(0.0, 1.0)
    }

    /// Whether the event/demand signal may move prices
    pub fn is_trusted(&self) -> bool {
        self.quality() >= MIN_TRUSTED_QUALITY
    }

    /// Positive competitor average, if any
    pub fn competitor_avg(&self) -> Option<f64> {
        self.competitor_avg_price.filter(|p| p.is_finite() && *p > 0.0)
    }
}
