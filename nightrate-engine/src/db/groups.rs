//! Property groups and membership
//!
//! Geofence and structural invariants are enforced here, when a member joins,
//! never at propagation time.

use chrono::{DateTime, Utc};
use nightrate_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::db::{format_instant, parse_optional_instant, properties::get_property};
use crate::models::group::GEOFENCE_RADIUS_M;
use crate::models::{Property, PropertyGroup};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Check a candidate against one existing member
pub fn check_compatible(candidate: &Property, member: &Property) -> Result<()> {
    let (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) = (
        candidate.latitude,
        candidate.longitude,
        member.latitude,
        member.longitude,
    ) else {
        return Err(Error::InvalidInput(format!(
            "Property {} and {} need coordinates to share a group",
            candidate.id, member.id
        )));
    };

    let distance = haversine_m(lat1, lon1, lat2, lon2);
    if distance > GEOFENCE_RADIUS_M {
        return Err(Error::InvalidInput(format!(
            "Property {} is {:.0} m from {} (max {} m)",
            candidate.id, distance, member.id, GEOFENCE_RADIUS_M
        )));
    }
    if candidate.capacity != member.capacity {
        return Err(Error::InvalidInput(format!(
            "Capacity mismatch: {} has {}, {} has {}",
            candidate.id, candidate.capacity, member.id, member.capacity
        )));
    }
    if candidate.property_type != member.property_type {
        return Err(Error::InvalidInput(format!(
            "Property type mismatch: {} is {}, {} is {}",
            candidate.id, candidate.property_type, member.id, member.property_type
        )));
    }
    if candidate.surface_bucket() != member.surface_bucket() {
        return Err(Error::InvalidInput(format!(
            "Surface bucket mismatch between {} and {}",
            candidate.id, member.id
        )));
    }
    Ok(())
}

/// Create a group around its main property
pub async fn create_group(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    main_property_id: &str,
    sync_prices: bool,
) -> Result<PropertyGroup> {
    get_property(pool, main_property_id).await?;

    sqlx::query(
        "INSERT INTO property_groups (id, name, main_property_id, sync_prices) VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(main_property_id)
    .bind(sync_prices as i64)
    .execute(pool)
    .await?;

    get_group(pool, id).await
}

pub async fn get_group(pool: &SqlitePool, id: &str) -> Result<PropertyGroup> {
    let row = sqlx::query(
        "SELECT id, name, main_property_id, sync_prices, last_pricing_update FROM property_groups WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Group {}", id)))?;

    let members: Vec<String> = sqlx::query_scalar(
        "SELECT property_id FROM group_members WHERE group_id = ? ORDER BY property_id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let main_property_id: String = row.get("main_property_id");
    let sync_prices: i64 = row.get("sync_prices");

    Ok(PropertyGroup {
        id: row.get("id"),
        name: row.get("name"),
        sync_prices: sync_prices != 0,
        last_pricing_update: parse_optional_instant(row.get("last_pricing_update"))?,
        members: members
            .into_iter()
            .filter(|m| *m != main_property_id)
            .collect(),
        main_property_id,
    })
}

/// Group a property belongs to, as main or member
///
/// A property whose group is its own main wins over plain membership.
pub async fn group_for_property(
    pool: &SqlitePool,
    property_id: &str,
) -> Result<Option<PropertyGroup>> {
    let as_main: Option<String> = sqlx::query_scalar(
        "SELECT id FROM property_groups WHERE main_property_id = ? ORDER BY id LIMIT 1",
    )
    .bind(property_id)
    .fetch_optional(pool)
    .await?;

    let group_id = match as_main {
        Some(id) => Some(id),
        None => {
            sqlx::query_scalar(
                "SELECT group_id FROM group_members WHERE property_id = ? ORDER BY group_id LIMIT 1",
            )
            .bind(property_id)
            .fetch_optional(pool)
            .await?
        }
    };

    match group_id {
        Some(id) => Ok(Some(get_group(pool, &id).await?)),
        None => Ok(None),
    }
}

/// Groups with `sync_prices = 1`
pub async fn list_sync_groups(pool: &SqlitePool) -> Result<Vec<PropertyGroup>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM property_groups WHERE sync_prices = 1 ORDER BY id")
            .fetch_all(pool)
            .await?;

    let mut groups = Vec::with_capacity(ids.len());
    for id in ids {
        groups.push(get_group(pool, &id).await?);
    }
    Ok(groups)
}

/// Add a member after checking geofence and structure against every current
/// member and the main
pub async fn add_group_member(pool: &SqlitePool, group_id: &str, property_id: &str) -> Result<()> {
    let group = get_group(pool, group_id).await?;
    if group.is_main(property_id) || group.members.iter().any(|m| m == property_id) {
        return Ok(());
    }

    let candidate = get_property(pool, property_id).await?;
    let main = get_property(pool, &group.main_property_id).await?;
    check_compatible(&candidate, &main)?;
    for member_id in &group.members {
        let member = get_property(pool, member_id).await?;
        check_compatible(&candidate, &member)?;
    }

    sqlx::query("INSERT INTO group_members (group_id, property_id) VALUES (?, ?)")
        .bind(group_id)
        .bind(property_id)
        .execute(pool)
        .await?;

    tracing::info!(group_id, property_id, "Property joined group");
    Ok(())
}

pub async fn remove_group_member(pool: &SqlitePool, group_id: &str, property_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM group_members WHERE group_id = ? AND property_id = ?")
        .bind(group_id)
        .bind(property_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_sync_prices(pool: &SqlitePool, group_id: &str, sync_prices: bool) -> Result<()> {
    sqlx::query("UPDATE property_groups SET sync_prices = ? WHERE id = ?")
        .bind(sync_prices as i64)
        .bind(group_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Stamp the group's last successful run (inside the PERSIST transaction)
pub async fn set_last_pricing_update(
    tx: &mut Transaction<'_, Sqlite>,
    group_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE property_groups SET last_pricing_update = ? WHERE id = ?")
        .bind(format_instant(now))
        .bind(group_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
