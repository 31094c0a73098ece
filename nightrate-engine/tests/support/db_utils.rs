//! Database and engine fixtures

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

use nightrate_common::events::EventBus;
use nightrate_engine::db::properties::{upsert_property, upsert_user};
use nightrate_engine::models::{
    Location, PriceEnvelope, Property, PropertyType, StayRules, Strategy,
};
use nightrate_engine::workflow::FixedClock;
use nightrate_engine::PricingEngine;

/// File-backed database in a temporary directory
///
/// Keep the `TempDir` alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().expect("temp dir");
    let pool = nightrate_common::db::init_database(&dir.path().join("nightrate.db"))
        .await
        .expect("database init");
    (dir, pool)
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid RFC 3339 instant")
        .with_timezone(&Utc)
}

/// Balanced Lyon apartment: floor 60, base 100, ceiling 300, weekend +25 %
pub fn sample_property(id: &str) -> Property {
    Property {
        id: id.to_string(),
        owner_id: "owner-1".to_string(),
        team_id: None,
        name: format!("Property {}", id),
        address: None,
        location: Location {
            city: "Lyon".to_string(),
            country: "FR".to_string(),
        },
        latitude: Some(45.7640),
        longitude: Some(4.8357),
        property_type: PropertyType::Apartment,
        capacity: 4,
        surface_m2: Some(55.0),
        amenities: BTreeSet::new(),
        external_id: None,
        strategy: Strategy::Balanced,
        envelope: PriceEnvelope::new(60.0, 100.0, Some(300.0)),
        rules: StayRules {
            weekend_markup_pct: 25.0,
            ..Default::default()
        },
        auto_pricing_enabled: true,
        auto_pricing_updated_at: None,
        timezone: "Europe/Paris".to_string(),
        last_pricing_update: None,
    }
}

/// Insert the owner (free tier) and the property
pub async fn seed_property(pool: &SqlitePool, property: &Property) {
    upsert_user(pool, &property.owner_id, Some(&property.timezone), "none")
        .await
        .expect("user insert");
    upsert_property(pool, property).await.expect("property insert");
}

/// Deterministic engine whose clock reads `now`
pub fn engine_at(pool: &SqlitePool, now: DateTime<Utc>) -> (PricingEngine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(now));
    let engine = PricingEngine::new(pool.clone(), EventBus::new(64)).with_clock(clock.clone());
    (engine, clock)
}
