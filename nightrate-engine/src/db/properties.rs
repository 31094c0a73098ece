//! Property rows

use chrono::{DateTime, Utc};
use nightrate_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeSet;

use crate::db::{format_instant, parse_optional_instant};
use crate::models::{
    Location, PriceEnvelope, Property, PropertyType, StayRules, Strategy,
};

/// Zone used when neither the property nor its owner has one
pub const DEFAULT_TIMEZONE: &str = "UTC";

const SELECT_PROPERTY: &str = r#"
    SELECT p.id, p.owner_id, p.team_id, p.name, p.address, p.city, p.country,
           p.latitude, p.longitude, p.property_type, p.capacity, p.surface_m2,
           p.amenities, p.external_id, p.strategy, p.floor_price, p.base_price,
           p.ceiling_price, p.min_stay, p.max_stay, p.weekly_discount_pct,
           p.monthly_discount_pct, p.weekend_markup_pct, p.auto_pricing_enabled,
           p.auto_pricing_updated_at, p.timezone, p.last_pricing_update,
           u.timezone AS owner_timezone
    FROM properties p
    LEFT JOIN users u ON u.id = p.owner_id
"#;

fn property_from_row(row: &SqliteRow) -> Result<Property> {
    let id: String = row.get("id");

    let strategy: String = row.get("strategy");
    let strategy = strategy
        .parse::<Strategy>()
        .map_err(|e| Error::InvalidInput(format!("Property {}: {}", id, e)))?;

    let property_type: String = row.get("property_type");
    let property_type = property_type
        .parse::<PropertyType>()
        .map_err(|e| Error::InvalidInput(format!("Property {}: {}", id, e)))?;

    let amenities: String = row.get("amenities");
    let amenities: BTreeSet<String> = serde_json::from_str(&amenities)
        .map_err(|e| Error::Internal(format!("Property {}: invalid amenities: {}", id, e)))?;

    let capacity: i64 = row.get("capacity");
    let min_stay: i64 = row.get("min_stay");
    let max_stay: Option<i64> = row.get("max_stay");

    // Property zone, then the owner's profile zone
    let timezone: Option<String> = row.get("timezone");
    let owner_timezone: Option<String> = row.get("owner_timezone");
    let timezone = timezone
        .filter(|tz| !tz.trim().is_empty())
        .or(owner_timezone.filter(|tz| !tz.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

    let auto_pricing_enabled: i64 = row.get("auto_pricing_enabled");

    Ok(Property {
        owner_id: row.get("owner_id"),
        team_id: row.get("team_id"),
        name: row.get("name"),
        address: row.get("address"),
        location: Location {
            city: row.get("city"),
            country: row.get("country"),
        },
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        property_type,
        capacity: u32::try_from(capacity).unwrap_or(0),
        surface_m2: row.get("surface_m2"),
        amenities,
        external_id: row.get("external_id"),
        strategy,
        envelope: PriceEnvelope::new(
            row.get("floor_price"),
            row.get("base_price"),
            row.get("ceiling_price"),
        ),
        rules: StayRules {
            min_stay: u32::try_from(min_stay).unwrap_or(0),
            max_stay: max_stay.and_then(|v| u32::try_from(v).ok()),
            weekly_discount_pct: row.get("weekly_discount_pct"),
            monthly_discount_pct: row.get("monthly_discount_pct"),
            weekend_markup_pct: row.get("weekend_markup_pct"),
        },
        auto_pricing_enabled: auto_pricing_enabled != 0,
        auto_pricing_updated_at: parse_optional_instant(row.get("auto_pricing_updated_at"))?,
        timezone,
        last_pricing_update: parse_optional_instant(row.get("last_pricing_update"))?,
        id,
    })
}

/// Load one property
pub async fn get_property(pool: &SqlitePool, id: &str) -> Result<Property> {
    let query = format!("{} WHERE p.id = ?", SELECT_PROPERTY);
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Property {}", id)))?;
    property_from_row(&row)
}

/// Load several properties, skipping unknown ids
pub async fn get_properties(pool: &SqlitePool, ids: &[String]) -> Result<Vec<Property>> {
    let mut properties = Vec::with_capacity(ids.len());
    for id in ids {
        match get_property(pool, id).await {
            Ok(property) => properties.push(property),
            Err(Error::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(properties)
}

/// Properties that opted into auto pricing
///
/// Rows that no longer decode (unknown strategy written by hand) are logged and
/// skipped so one bad row cannot stall the scheduler.
pub async fn list_auto_priced(pool: &SqlitePool) -> Result<Vec<Property>> {
    let query = format!(
        "{} WHERE p.auto_pricing_enabled = 1 ORDER BY p.id",
        SELECT_PROPERTY
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    let mut properties = Vec::with_capacity(rows.len());
    for row in &rows {
        match property_from_row(row) {
            Ok(property) => properties.push(property),
            Err(e) => tracing::warn!(error = %e, "Skipping undecodable property row"),
        }
    }
    Ok(properties)
}

/// Insert or replace a property row
pub async fn upsert_property(pool: &SqlitePool, property: &Property) -> Result<()> {
    let amenities = serde_json::to_string(&property.amenities)
        .map_err(|e| Error::Internal(format!("Failed to serialize amenities: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO properties (
            id, owner_id, team_id, name, address, city, country, latitude, longitude,
            property_type, capacity, surface_m2, amenities, external_id, strategy,
            floor_price, base_price, ceiling_price, min_stay, max_stay,
            weekly_discount_pct, monthly_discount_pct, weekend_markup_pct,
            auto_pricing_enabled, auto_pricing_updated_at, timezone, last_pricing_update
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            owner_id = excluded.owner_id,
            team_id = excluded.team_id,
            name = excluded.name,
            address = excluded.address,
            city = excluded.city,
            country = excluded.country,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            property_type = excluded.property_type,
            capacity = excluded.capacity,
            surface_m2 = excluded.surface_m2,
            amenities = excluded.amenities,
            external_id = excluded.external_id,
            strategy = excluded.strategy,
            floor_price = excluded.floor_price,
            base_price = excluded.base_price,
            ceiling_price = excluded.ceiling_price,
            min_stay = excluded.min_stay,
            max_stay = excluded.max_stay,
            weekly_discount_pct = excluded.weekly_discount_pct,
            monthly_discount_pct = excluded.monthly_discount_pct,
            weekend_markup_pct = excluded.weekend_markup_pct,
            auto_pricing_enabled = excluded.auto_pricing_enabled,
            auto_pricing_updated_at = excluded.auto_pricing_updated_at,
            timezone = excluded.timezone,
            last_pricing_update = excluded.last_pricing_update
        "#,
    )
    .bind(&property.id)
    .bind(&property.owner_id)
    .bind(&property.team_id)
    .bind(&property.name)
    .bind(&property.address)
    .bind(&property.location.city)
    .bind(&property.location.country)
    .bind(property.latitude)
    .bind(property.longitude)
    .bind(property.property_type.as_str())
    .bind(property.capacity as i64)
    .bind(property.surface_m2)
    .bind(&amenities)
    .bind(&property.external_id)
    .bind(property.strategy.as_str())
    .bind(property.envelope.floor)
    .bind(property.envelope.base)
    .bind(property.envelope.ceiling)
    .bind(property.rules.min_stay as i64)
    .bind(property.rules.max_stay.map(|v| v as i64))
    .bind(property.rules.weekly_discount_pct)
    .bind(property.rules.monthly_discount_pct)
    .bind(property.rules.weekend_markup_pct)
    .bind(property.auto_pricing_enabled as i64)
    .bind(property.auto_pricing_updated_at.map(format_instant))
    .bind(&property.timezone)
    .bind(property.last_pricing_update.map(format_instant))
    .execute(pool)
    .await?;

    Ok(())
}

/// Toggle auto pricing and stamp the change
pub async fn set_auto_pricing(
    pool: &SqlitePool,
    id: &str,
    enabled: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE properties SET auto_pricing_enabled = ?, auto_pricing_updated_at = ? WHERE id = ?",
    )
    .bind(enabled as i64)
    .bind(format_instant(now))
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Property {}", id)));
    }
    Ok(())
}

/// Insert or update a user row (timezone and billing status)
pub async fn upsert_user(
    pool: &SqlitePool,
    id: &str,
    timezone: Option<&str>,
    subscription_status: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (id, timezone, subscription_status) VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            timezone = excluded.timezone,
            subscription_status = excluded.subscription_status
        "#,
    )
    .bind(id)
    .bind(timezone)
    .bind(subscription_status)
    .execute(pool)
    .await?;
    Ok(())
}
