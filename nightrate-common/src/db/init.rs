//! Database initialization
//!
//! Opens (or creates) the SQLite database, enables WAL, and creates every
//! table idempotently. Safe to call on each startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Busy timeout applied to every connection (milliseconds)
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the scheduler's readers run alongside one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    create_all_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database (unit tests, dry runs)
///
/// One connection only: every pooled connection to `:memory:` would
/// otherwise see its own empty database.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_all_tables(&pool).await?;
    Ok(pool)
}

/// Create every nightrate table (idempotent)
pub async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_users_table(pool).await?;
    create_properties_table(pool).await?;
    create_groups_tables(pool).await?;
    create_market_features_table(pool).await?;
    create_price_overrides_table(pool).await?;
    create_pricing_model_metrics_table(pool).await?;
    create_user_ai_usage_table(pool).await?;
    create_auto_pricing_state_table(pool).await?;
    create_demand_observations_table(pool).await?;
    Ok(())
}

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT,
            timezone TEXT,
            subscription_status TEXT NOT NULL DEFAULT 'none'
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_properties_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS properties (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            team_id TEXT,
            name TEXT NOT NULL DEFAULT '',
            address TEXT,
            city TEXT NOT NULL,
            country TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            property_type TEXT NOT NULL,
            capacity INTEGER NOT NULL CHECK (capacity > 0),
            surface_m2 REAL,
            amenities TEXT NOT NULL DEFAULT '[]',
            external_id TEXT,
            strategy TEXT NOT NULL DEFAULT 'Balanced',
            floor_price REAL NOT NULL,
            base_price REAL NOT NULL,
            ceiling_price REAL,
            min_stay INTEGER NOT NULL DEFAULT 1,
            max_stay INTEGER,
            weekly_discount_pct REAL NOT NULL DEFAULT 0,
            monthly_discount_pct REAL NOT NULL DEFAULT 0,
            weekend_markup_pct REAL NOT NULL DEFAULT 0,
            auto_pricing_enabled INTEGER NOT NULL DEFAULT 0,
            auto_pricing_updated_at TEXT,
            timezone TEXT,
            last_pricing_update TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_properties_auto ON properties(auto_pricing_enabled)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_groups_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS property_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            main_property_id TEXT NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
            sync_prices INTEGER NOT NULL DEFAULT 0,
            last_pricing_update TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_members (
            group_id TEXT NOT NULL REFERENCES property_groups(id) ON DELETE CASCADE,
            property_id TEXT NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
            PRIMARY KEY (group_id, property_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_market_features_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS market_features (
            country TEXT NOT NULL,
            city TEXT NOT NULL,
            date TEXT NOT NULL,
            competitor_avg_price REAL,
            competitor_min_price REAL,
            competitor_max_price REAL,
            competitor_p50_price REAL,
            sample_size INTEGER,
            weather_score REAL,
            expected_demand_impact REAL,
            market_trend_score REAL,
            has_major_event INTEGER,
            event_count INTEGER,
            data_quality_score REAL,
            PRIMARY KEY (country, city, date)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_price_overrides_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS price_overrides (
            property_id TEXT NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
            date TEXT NOT NULL,
            price INTEGER NOT NULL CHECK (price > 0),
            reason TEXT NOT NULL DEFAULT '',
            locked INTEGER NOT NULL DEFAULT 0,
            updated_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (property_id, date)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_pricing_model_metrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pricing_model_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            property_id TEXT NOT NULL,
            model_version INTEGER NOT NULL,
            val_rmse REAL NOT NULL,
            trained_at TEXT NOT NULL,
            feature_importance TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_model_metrics_property ON pricing_model_metrics(property_id, trained_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_user_ai_usage_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_ai_usage (
            user_id TEXT NOT NULL,
            date TEXT NOT NULL,
            calls_count INTEGER NOT NULL DEFAULT 0,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, date)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_auto_pricing_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS auto_pricing_state (
            subject_kind TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            failed_attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt TEXT,
            last_successful_run TEXT,
            last_error TEXT,
            PRIMARY KEY (subject_kind, subject_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_demand_observations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS demand_observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            property_id TEXT NOT NULL,
            date TEXT NOT NULL,
            price REAL NOT NULL,
            bookings REAL NOT NULL,
            lead_days INTEGER NOT NULL DEFAULT 0,
            weather_score REAL,
            expected_demand_impact REAL,
            market_trend_score REAL,
            competitor_avg_price REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_demand_observations_property ON demand_observations(property_id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
