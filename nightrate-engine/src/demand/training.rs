//! Demand model training with a seeded holdout
//!
//! An existing artifact is only replaced when the candidate's validation RMSE
//! is at most 95 % of the current one.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

use crate::demand::model::{feature_importance, feature_vector, fit_ridge, rmse, DemandModel};
use crate::demand::{ContextFeatures, Observation};

/// Observations required before a model is trained
pub const MIN_OBSERVATIONS: usize = 30;

/// Candidate must reach this share of the current RMSE to replace it
pub const REPLACEMENT_RATIO: f64 = 0.95;

pub const VALIDATION_SHARE: f64 = 0.2;

const RIDGE_LAMBDA: f64 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum TrainingError {
    #[error("Need at least {needed} observations, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Regression system is singular")]
    Singular,
}

/// Candidate model and whether it should replace the current artifact
#[derive(Debug, Clone, PartialEq)]
pub struct TrainResult {
    pub candidate: DemandModel,
    pub replaced: bool,
}

/// Deterministic 80/20 split of `0..n` into (train, validation) indices
pub fn split_holdout(n: usize, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let validation_len = ((n as f64) * VALIDATION_SHARE).round().max(1.0) as usize;
    let validation_len = validation_len.min(n.saturating_sub(1));
    let validation = indices.split_off(n - validation_len);
    (indices, validation)
}

fn usable(obs: &Observation) -> bool {
    obs.price.is_finite() && obs.price > 0.0 && obs.bookings.is_finite() && obs.bookings >= 0.0
}

/// Fit a candidate and decide replacement against `current`
pub fn train_model(
    property_id: &str,
    observations: &[Observation],
    current: Option<&DemandModel>,
    seed: u64,
    now: DateTime<Utc>,
) -> Result<TrainResult, TrainingError> {
    let samples: Vec<(ContextFeatures, f64, f64)> = observations
        .iter()
        .filter(|o| usable(o))
        .map(|o| (o.context(), o.price, o.bookings))
        .collect();

    if samples.len() < MIN_OBSERVATIONS {
        return Err(TrainingError::InsufficientData {
            needed: MIN_OBSERVATIONS,
            got: samples.len(),
        });
    }

    let (train_idx, validation_idx) = split_holdout(samples.len(), seed);
    let train_rows: Vec<_> = train_idx
        .iter()
        .map(|&i| feature_vector(&samples[i].0, samples[i].1))
        .collect();
    let train_targets: Vec<f64> = train_idx.iter().map(|&i| samples[i].2.ln_1p()).collect();

    let coefficients =
        fit_ridge(&train_rows, &train_targets, RIDGE_LAMBDA).ok_or(TrainingError::Singular)?;

    let validation: Vec<_> = validation_idx.iter().map(|&i| samples[i].clone()).collect();
    let val_rmse = rmse(&coefficients, &validation);

    let replaced = match current {
        Some(existing) if existing.is_well_formed() => val_rmse <= existing.val_rmse * REPLACEMENT_RATIO,
        _ => true,
    };
    let version = current.map(|m| m.version).unwrap_or(0) + if replaced { 1 } else { 0 };

    Ok(TrainResult {
        candidate: DemandModel {
            property_id: property_id.to_string(),
            version,
            trained_at: now,
            val_rmse,
            feature_importance: feature_importance(&coefficients, &train_rows),
            coefficients,
        },
        replaced,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{Duration, NaiveDate};

    /// Synthetic history where bookings fall with price
    pub fn synthetic_observations(count: usize) -> Vec<Observation> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        (0..count)
            .map(|i| {
                let price = 60.0 + (i % 15) as f64 * 10.0;
                let bookings = (3.0 - price / 80.0).max(0.0) + if i % 7 == 5 { 0.5 } else { 0.0 };
                Observation {
                    date: start + Duration::days(i as i64),
                    price,
                    bookings,
                    lead_days: (i % 60) as i64,
                    weather_score: Some(50.0 + (i % 5) as f64 * 5.0),
                    expected_demand_impact: None,
                    market_trend_score: Some(0.1),
                    competitor_avg_price: Some(110.0),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::synthetic_observations;
    use super::*;

    #[test]
    fn test_split_is_deterministic_and_disjoint() {
        let (train_a, val_a) = split_holdout(50, 42);
        let (train_b, val_b) = split_holdout(50, 42);
        assert_eq!(train_a, train_b);
        assert_eq!(val_a, val_b);
        assert_eq!(val_a.len(), 10);
        assert_eq!(train_a.len(), 40);
        assert!(val_a.iter().all(|i| !train_a.contains(i)));
    }

    #[test]
    fn test_insufficient_data() {
        let result = train_model("p1", &synthetic_observations(10), None, 1, Utc::now());
        assert_eq!(
            result.unwrap_err(),
            TrainingError::InsufficientData { needed: 30, got: 10 }
        );
    }

    #[test]
    fn test_first_model_is_always_accepted() {
        let result = train_model("p1", &synthetic_observations(90), None, 7, Utc::now()).unwrap();
        assert!(result.replaced);
        assert_eq!(result.candidate.version, 1);
        assert!(result.candidate.is_well_formed());
    }

    #[test]
    fn test_replacement_requires_five_percent_gain() {
        let observations = synthetic_observations(90);
        let first = train_model("p1", &observations, None, 7, Utc::now()).unwrap().candidate;

        // Same data and seed: identical RMSE, not 5 % better
        let again = train_model("p1", &observations, Some(&first), 7, Utc::now()).unwrap();
        assert!(!again.replaced);
        assert_eq!(again.candidate.version, 1);

        let mut worse = first.clone();
        worse.val_rmse = first.val_rmse * 2.0 + 1.0;
        let better = train_model("p1", &observations, Some(&worse), 7, Utc::now()).unwrap();
        assert!(better.replaced);
        assert_eq!(better.candidate.version, 2);
    }
}
