//! Log-linear demand regression
//!
//! `ln(1 + bookings) = β · x(context, price)`, fitted per property by ridge
//! regression. Prediction inverts the link and floors at zero.

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

use crate::demand::{ContextFeatures, GridPoint, RevenueOptimum};

pub const FEATURE_NAMES: [&str; 10] = [
    "intercept",
    "log_price",
    "weekend",
    "month_sin",
    "month_cos",
    "lead",
    "weather",
    "event_impact",
    "trend",
    "price_ratio",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Design row for one `(context, price)` pair
pub fn feature_vector(context: &ContextFeatures, price: f64) -> [f64; FEATURE_COUNT] {
    let price = price.max(1.0);
    let weekend = matches!(context.date.weekday(), Weekday::Fri | Weekday::Sat);
    let angle = 2.0 * PI * (context.date.month0() as f64) / 12.0;
    let ratio = match context.competitor_avg_price {
        Some(avg) if avg > 0.0 => price / avg,
        _ => 1.0,
    };

    [
        1.0,
        price.ln(),
        if weekend { 1.0 } else { 0.0 },
        angle.sin(),
        angle.cos(),
        context.lead_days as f64 / 180.0,
        context.weather_score.unwrap_or(50.0) / 100.0,
        context.expected_demand_impact.unwrap_or(0.0) / 100.0,
        context.market_trend_score.unwrap_or(0.0),
        ratio,
    ]
}

/// Trained artifact, stored as `<models_dir>/<property_id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandModel {
    pub property_id: String,
    pub version: i64,
    pub trained_at: DateTime<Utc>,
    pub val_rmse: f64,
    pub coefficients: Vec<f64>,
    pub feature_importance: BTreeMap<String, f64>,
}

impl DemandModel {
    pub fn is_well_formed(&self) -> bool {
        self.coefficients.len() == FEATURE_COUNT
            && self.coefficients.iter().all(|c| c.is_finite())
            && self.val_rmse.is_finite()
            && self.val_rmse >= 0.0
    }

    /// Expected bookings at `price`, never negative
    pub fn predict(&self, context: &ContextFeatures, price: f64) -> f64 {
        predict_with(&self.coefficients, context, price)
    }

    /// `1 / (1 + val_rmse)`
    pub fn confidence(&self) -> f64 {
        (1.0 / (1.0 + self.val_rmse.max(0.0))).clamp(0.0, 1.0)
    }

    /// Demand and revenue at every positive grid price, capped by capacity
    pub fn optimize(
        &self,
        context: &ContextFeatures,
        capacity_remaining: f64,
        grid: &[f64],
    ) -> Vec<GridPoint> {
        grid.iter()
            .copied()
            .filter(|p| p.is_finite() && *p > 0.0)
            .map(|price| {
                let demand = self.predict(context, price);
                GridPoint {
                    price,
                    predicted_demand: demand,
                    expected_revenue: price * demand.min(capacity_remaining.max(0.0)),
                }
            })
            .collect()
    }

    /// Grid price with the highest expected revenue; ties keep the lower price
    pub fn argmax_revenue(
        &self,
        context: &ContextFeatures,
        capacity_remaining: f64,
        grid: &[f64],
    ) -> Option<RevenueOptimum> {
        let mut points = self.optimize(context, capacity_remaining, grid);
        points.sort_by(|a, b| a.price.total_cmp(&b.price));
        points
            .into_iter()
            .fold(None::<GridPoint>, |best, point| match best {
                Some(b) if b.expected_revenue >= point.expected_revenue => Some(b),
                _ => Some(point),
            })
            .map(|best| RevenueOptimum {
                price: best.price,
                predicted_demand: best.predicted_demand,
                expected_revenue: best.expected_revenue,
                confidence: self.confidence(),
            })
    }
}

pub fn predict_with(coefficients: &[f64], context: &ContextFeatures, price: f64) -> f64 {
    let x = feature_vector(context, price);
    let z: f64 = coefficients.iter().zip(x.iter()).map(|(b, v)| b * v).sum();
    // Cap the exponent so a wild coefficient cannot overflow
    (z.min(20.0).exp() - 1.0).max(0.0)
}

/// Ridge regression by normal equations; the intercept is not penalized
///
/// Returns `None` when the system is singular.
pub fn fit_ridge(rows: &[[f64; FEATURE_COUNT]], targets: &[f64], lambda: f64) -> Option<Vec<f64>> {
    if rows.is_empty() || rows.len() != targets.len() {
        return None;
    }

    let n = FEATURE_COUNT;
    let mut a = vec![vec![0.0; n + 1]; n];
    for (row, y) in rows.iter().zip(targets) {
        for i in 0..n {
            for j in 0..n {
                a[i][j] += row[i] * row[j];
            }
            a[i][n] += row[i] * y;
        }
    }
    for (i, a_row) in a.iter_mut().enumerate().skip(1) {
        a_row[i] += lambda;
    }

    // Gaussian elimination with partial pivoting on the augmented matrix
    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..=n {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut beta = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * beta[k]).sum();
        beta[row] = (a[row][n] - tail) / a[row][row];
    }

    if beta.iter().all(|b| b.is_finite()) {
        Some(beta)
    } else {
        None
    }
}

/// RMSE in bookings space
pub fn rmse(coefficients: &[f64], samples: &[(ContextFeatures, f64, f64)]) -> f64 {
    if samples.is_empty() {
        return f64::INFINITY;
    }
    let sum: f64 = samples
        .iter()
        .map(|(context, price, bookings)| {
            let err = predict_with(coefficients, context, *price) - bookings;
            err * err
        })
        .sum();
    (sum / samples.len() as f64).sqrt()
}

/// `|β_j| · std(x_j)`, normalized to sum to 1 (intercept excluded)
pub fn feature_importance(coefficients: &[f64], rows: &[[f64; FEATURE_COUNT]]) -> BTreeMap<String, f64> {
    let mut raw = BTreeMap::new();
    if rows.is_empty() {
        return raw;
    }
    let count = rows.len() as f64;
    for j in 1..FEATURE_COUNT {
        let mean = rows.iter().map(|r| r[j]).sum::<f64>() / count;
        let var = rows.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / count;
        raw.insert(
            FEATURE_NAMES[j].to_string(),
            coefficients.get(j).copied().unwrap_or(0.0).abs() * var.sqrt(),
        );
    }
    let total: f64 = raw.values().sum();
    if total > 0.0 {
        for value in raw.values_mut() {
            *value /= total;
        }
    }
    raw
}
