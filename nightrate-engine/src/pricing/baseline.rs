//! Deterministic baseline
//!
//! `clamp(base · m_season · m_dow · m_event · m_lead · m_quality, floor, ceiling)`
//! computed per night. Pure: no I/O, no clock. The result is both an input to
//! the ML/LLM layers and the fallback when they fail.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{MarketFeatures, Property, Strategy};
use crate::pricing::season::season_multiplier;

/// Multipliers closer than this to 1.0 stay out of the reason trace
pub const REASON_THRESHOLD: f64 = 0.02;

/// Ceiling relaxation on major-event days
pub const EVENT_CEILING_FACTOR: f64 = 1.5;

const BUSINESS_MIDWEEK_PREMIUM: f64 = 1.10;
const EARLY_BOOKING_DAYS: i64 = 90;
const LAST_MINUTE_DAYS: i64 = 21;
const EARLY_BOOKING_MULTIPLIER: f64 = 1.10;
const BALANCED_LAST_MINUTE_FLOOR: f64 = 0.9;
const EVENT_IMPACT_MIN: f64 = -0.3;
const EVENT_IMPACT_MAX: f64 = 1.5;
const COMPETITOR_WEIGHT: f64 = 0.3;

/// Destinations where demand peaks midweek; compared lowercase
const BUSINESS_CITIES: &[&str] = &[
    "frankfurt",
    "zurich",
    "zürich",
    "geneva",
    "genève",
    "brussels",
    "bruxelles",
    "luxembourg",
    "la défense",
    "la defense",
    "canary wharf",
    "davos",
    "houston",
    "singapore",
    "basel",
    "strasbourg",
    "the hague",
    "den haag",
];

pub fn is_business_destination(city: &str) -> bool {
    let normalized = city.trim().to_lowercase();
    BUSINESS_CITIES.contains(&normalized.as_str())
}

/// Individual factors of one baseline night
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Multipliers {
    pub season: f64,
    pub dow: f64,
    pub event: f64,
    pub lead: f64,
    pub quality: f64,
}

/// One baseline night with its trace and tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineDay {
    pub date: NaiveDate,
    /// Clamped, unrounded
    pub price: f64,
    pub multipliers: Multipliers,
    /// Ordered labels of the multipliers that moved the price by ≥ 2 %
    pub reasons: Vec<String>,
    /// Trusted event signal on this night (smoothing and sanity exemption)
    pub event: bool,
    /// `has_major_event` flagged (ceiling relaxation)
    pub major_event: bool,
}

impl BaselineDay {
    /// Reason string stored with deterministic prices
    pub fn reason(&self) -> String {
        if self.reasons.is_empty() {
            "Base rate".to_string()
        } else {
            self.reasons.join(", ")
        }
    }
}

fn m_dow(date: NaiveDate, property: &Property) -> (f64, Option<&'static str>) {
    let weekday = date.weekday();
    if is_business_destination(&property.location.city) {
        match weekday {
            Weekday::Tue | Weekday::Wed => (BUSINESS_MIDWEEK_PREMIUM, Some("Business midweek")),
            _ => (1.0, None),
        }
    } else {
        match weekday {
            Weekday::Fri | Weekday::Sat => (
                1.0 + property.rules.weekend_markup_pct / 100.0,
                Some("Weekend"),
            ),
            _ => (1.0, None),
        }
    }
}

fn m_event(features: Option<&MarketFeatures>) -> f64 {
    match features {
        Some(f) if f.is_trusted() => match f.expected_demand_impact {
            Some(impact) if impact.is_finite() => {
                1.0 + (impact / 100.0).clamp(EVENT_IMPACT_MIN, EVENT_IMPACT_MAX)
            }
            _ => 1.0,
        },
        _ => 1.0,
    }
}

fn m_lead(days_ahead: i64, property: &Property) -> f64 {
    if days_ahead >= EARLY_BOOKING_DAYS {
        return EARLY_BOOKING_MULTIPLIER;
    }
    if days_ahead >= LAST_MINUTE_DAYS {
        return 1.0;
    }
    let progress = days_ahead.max(0) as f64 / LAST_MINUTE_DAYS as f64;
    match property.strategy {
        Strategy::Aggressive => 1.0,
        Strategy::Balanced => {
            BALANCED_LAST_MINUTE_FLOOR + (1.0 - BALANCED_LAST_MINUTE_FLOOR) * progress
        }
        Strategy::Prudent => {
            let ratio = property.envelope.floor / property.envelope.base;
            ratio + (1.0 - ratio) * progress
        }
    }
}

fn moved(multiplier: f64) -> bool {
    (multiplier - 1.0).abs() >= REASON_THRESHOLD
}

/// Baseline for one night
///
/// `today` is the run's local date; `features` is `None` when the store has
/// no row or could not be read.
pub fn compute_baseline(
    property: &Property,
    date: NaiveDate,
    today: NaiveDate,
    features: Option<&MarketFeatures>,
) -> BaselineDay {
    let envelope = property.envelope;
    let days_ahead = (date - today).num_days();

    let season = season_multiplier(
        date.month(),
        &property.location.country,
        property.property_type,
    );
    let (dow, dow_label) = m_dow(date, property);
    let event = m_event(features);
    let lead = m_lead(days_ahead, property);

    let combined = season * dow * event * lead;
    let unblended = envelope.base * combined;

    // Bias toward the competitor average, trusted in proportion to quality
    let quality = match features.and_then(|f| f.competitor_avg().map(|avg| (avg, f.quality()))) {
        Some((avg, q)) if unblended > 0.0 => {
            let w = COMPETITOR_WEIGHT * q;
            let blend = (1.0 - w) * unblended + w * avg;
            blend / unblended
        }
        _ => 1.0,
    };

    let major_event = features.map(|f| f.has_major_event).unwrap_or(false);
    let ceiling = if major_event && property.strategy != Strategy::Prudent {
        envelope.ceiling * EVENT_CEILING_FACTOR
    } else {
        envelope.ceiling
    };
    let price = (unblended * quality).clamp(envelope.floor, ceiling);

    let event_tag = match features {
        Some(f) if f.is_trusted() => f.has_major_event || f.event_count > 0 || moved(event),
        _ => false,
    };

    let mut reasons = Vec::new();
    if moved(season) {
        reasons.push(if season > 1.0 { "High season" } else { "Low season" }.to_string());
    }
    if let Some(label) = dow_label {
        if moved(dow) {
            reasons.push(label.to_string());
        }
    }
    if moved(event) {
        let label = if major_event {
            "Major event"
        } else if event > 1.0 {
            "Local event"
        } else {
            "Low demand signal"
        };
        reasons.push(label.to_string());
    }
    if moved(lead) {
        let label = if lead > 1.0 {
            "Early booking"
        } else if property.strategy == Strategy::Prudent {
            "Last minute – Prudent"
        } else {
            "Last minute – Balanced"
        };
        reasons.push(label.to_string());
    }
    if moved(quality) {
        reasons.push("Competitor alignment".to_string());
    }

    BaselineDay {
        date,
        price,
        multipliers: Multipliers {
            season,
            dow,
            event,
            lead,
            quality,
        },
        reasons,
        event: event_tag,
        major_event,
    }
}

/// Dates `today .. today + horizon_days`
pub fn horizon_dates(today: NaiveDate, horizon_days: u32) -> Vec<NaiveDate> {
    today.iter_days().take(horizon_days as usize).collect()
}

/// Baseline for every night of the horizon, in date order
pub fn compute_horizon(
    property: &Property,
    today: NaiveDate,
    horizon_days: u32,
    features: &HashMap<NaiveDate, MarketFeatures>,
) -> Vec<BaselineDay> {
    horizon_dates(today, horizon_days)
        .into_iter()
        .map(|date| compute_baseline(property, date, today, features.get(&date)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::property::test_support::sample_property;
    use crate::models::PriceEnvelope;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_high_season_weekend() {
        let property = sample_property("p1");
        let day = compute_baseline(&property, date("2026-07-18"), date("2026-06-01"), None);

        assert_eq!(day.multipliers.season, 1.6);
        assert_eq!(day.multipliers.dow, 1.25);
        assert_eq!(day.multipliers.event, 1.0);
        assert_eq!(day.multipliers.lead, 1.0);
        assert!((day.price - 200.0).abs() < 1e-9);
        assert_eq!(day.reasons, vec!["High season", "Weekend"]);
        assert!(!day.event);
    }

    #[test]
    fn test_major_event_relaxes_ceiling_unless_prudent() {
        let mut property = sample_property("p1");
        let features = MarketFeatures {
            city: "Lyon".into(),
            country: "FR".into(),
            date: date("2026-07-04"),
            expected_demand_impact: Some(120.0),
            has_major_event: true,
            data_quality_score: Some(0.9),
            ..Default::default()
        };

        let day = compute_baseline(&property, date("2026-07-04"), date("2026-06-01"), Some(&features));
        // 100 · 1.6 · 1.25 · 2.2 = 440, under the relaxed 450 ceiling
        assert!((day.price - 440.0).abs() < 1e-9);
        assert!(day.event);
        assert!(day.major_event);
        assert!(day.reasons.contains(&"Major event".to_string()));

        property.strategy = Strategy::Prudent;
        let day = compute_baseline(&property, date("2026-07-04"), date("2026-06-01"), Some(&features));
        assert_eq!(day.price, 300.0);
    }

    #[test]
    fn test_low_quality_features_ignored_for_events() {
        let property = sample_property("p1");
        let features = MarketFeatures {
            expected_demand_impact: Some(80.0),
            event_count: 3,
            data_quality_score: Some(0.2),
            ..Default::default()
        };
        let day = compute_baseline(&property, date("2026-04-08"), date("2026-03-01"), Some(&features));
        assert_eq!(day.multipliers.event, 1.0);
        assert!(!day.event);
    }

    #[test]
    fn test_prudent_last_minute_decays_toward_floor() {
        let mut property = sample_property("p1");
        property.strategy = Strategy::Prudent;
        property.envelope = PriceEnvelope::new(70.0, 120.0, None);
        property.rules.weekend_markup_pct = 0.0;

        let today = date("2026-04-06");
        let day = compute_baseline(&property, date("2026-04-09"), today, None);
        // 70/120 + (1 - 70/120) · 3/21
        assert!((day.multipliers.lead - 0.642857).abs() < 1e-5);
        assert!((day.price - 77.142857).abs() < 1e-4);
        assert_eq!(day.reasons, vec!["Last minute – Prudent"]);

        let same_day = compute_baseline(&property, today, today, None);
        assert!((same_day.price - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_balanced_and_aggressive_lead() {
        let mut property = sample_property("p1");
        let today = date("2026-04-06");
        assert!((compute_baseline(&property, today, today, None).multipliers.lead - 0.9).abs() < 1e-9);

        property.strategy = Strategy::Aggressive;
        assert_eq!(compute_baseline(&property, today, today, None).multipliers.lead, 1.0);

        let far = compute_baseline(&property, date("2026-08-01"), today, None);
        assert_eq!(far.multipliers.lead, 1.10);
        assert!(far.reasons.contains(&"Early booking".to_string()));
    }

    #[test]
    fn test_competitor_blend() {
        let property = sample_property("p1");
        let features = MarketFeatures {
            competitor_avg_price: Some(200.0),
            data_quality_score: Some(1.0),
            ..Default::default()
        };
        // April Wednesday, 45 days ahead: unblended 100, w = 0.3 → 130
        let day = compute_baseline(&property, date("2026-04-22"), date("2026-03-08"), Some(&features));
        assert!((day.price - 130.0).abs() < 1e-9);
        assert!((day.multipliers.quality - 1.3).abs() < 1e-9);
        assert_eq!(day.reasons, vec!["Competitor alignment"]);
    }

    #[test]
    fn test_business_destination_flips_weekday_premium() {
        let mut property = sample_property("p1");
        property.location.city = " Frankfurt ".into();
        let today = date("2026-03-01");
        let tuesday = compute_baseline(&property, date("2026-04-14"), today, None);
        let saturday = compute_baseline(&property, date("2026-04-18"), today, None);
        assert_eq!(tuesday.multipliers.dow, 1.10);
        assert_eq!(saturday.multipliers.dow, 1.0);
        assert_eq!(tuesday.reasons, vec!["Business midweek"]);
    }

    #[test]
    fn test_horizon_covers_every_day() {
        let property = sample_property("p1");
        let days = compute_horizon(&property, date("2026-01-01"), 180, &HashMap::new());
        assert_eq!(days.len(), 180);
        assert_eq!(days[0].date, date("2026-01-01"));
        assert_eq!(days[179].date, date("2026-06-29"));
        assert!(days
            .iter()
            .all(|d| d.price >= property.envelope.floor && d.price <= property.envelope.ceiling));
    }
}
