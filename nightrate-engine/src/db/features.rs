//! Market feature rows (read-only for the engine)

use chrono::NaiveDate;
use nightrate_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::db::{format_date, parse_date};
use crate::models::MarketFeatures;

const SELECT_FEATURES: &str = r#"
    SELECT country, city, date, competitor_avg_price, competitor_min_price,
           competitor_max_price, competitor_p50_price, sample_size, weather_score,
           expected_demand_impact, market_trend_score, has_major_event, event_count,
           data_quality_score
    FROM market_features
"#;

fn features_from_row(row: &SqliteRow) -> Result<MarketFeatures> {
    let date: String = row.get("date");
    let has_major_event: Option<i64> = row.get("has_major_event");
    let event_count: Option<i64> = row.get("event_count");

    Ok(MarketFeatures {
        city: row.get("city"),
        country: row.get("country"),
        date: parse_date(&date)?,
        competitor_avg_price: row.get("competitor_avg_price"),
        competitor_min_price: row.get("competitor_min_price"),
        competitor_max_price: row.get("competitor_max_price"),
        competitor_p50_price: row.get("competitor_p50_price"),
        sample_size: row.get("sample_size"),
        weather_score: row.get("weather_score"),
        expected_demand_impact: row.get("expected_demand_impact"),
        market_trend_score: row.get("market_trend_score"),
        has_major_event: has_major_event.unwrap_or(0) != 0,
        event_count: event_count.unwrap_or(0),
        data_quality_score: row.get("data_quality_score"),
    })
}

/// Lookup by `(country, city, date)`
pub async fn get_features(
    pool: &SqlitePool,
    country: &str,
    city: &str,
    date: NaiveDate,
) -> Result<Option<MarketFeatures>> {
    let query = format!(
        "{} WHERE country = ? AND city = ? AND date = ?",
        SELECT_FEATURES
    );
    let row = sqlx::query(&query)
        .bind(country)
        .bind(city)
        .bind(format_date(date))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(features_from_row).transpose()
}

/// All rows for a location within `[start, end]`
pub async fn features_in_range(
    pool: &SqlitePool,
    country: &str,
    city: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MarketFeatures>> {
    let query = format!(
        "{} WHERE country = ? AND city = ? AND date >= ? AND date <= ? ORDER BY date",
        SELECT_FEATURES
    );
    let rows = sqlx::query(&query)
        .bind(country)
        .bind(city)
        .bind(format_date(start))
        .bind(format_date(end))
        .fetch_all(pool)
        .await?;
    rows.iter().map(features_from_row).collect()
}

/// Write a feature row (upstream pipeline and tests)
pub async fn upsert_features(pool: &SqlitePool, f: &MarketFeatures) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO market_features (
            country, city, date, competitor_avg_price, competitor_min_price,
            competitor_max_price, competitor_p50_price, sample_size, weather_score,
            expected_demand_impact, market_trend_score, has_major_event, event_count,
            data_quality_score
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(country, city, date) DO UPDATE SET
            competitor_avg_price = excluded.competitor_avg_price,
            competitor_min_price = excluded.competitor_min_price,
            competitor_max_price = excluded.competitor_max_price,
            competitor_p50_price = excluded.competitor_p50_price,
            sample_size = excluded.sample_size,
            weather_score = excluded.weather_score,
            expected_demand_impact = excluded.expected_demand_impact,
            market_trend_score = excluded.market_trend_score,
            has_major_event = excluded.has_major_event,
            event_count = excluded.event_count,
            data_quality_score = excluded.data_quality_score
        "#,
    )
    .bind(&f.country)
    .bind(&f.city)
    .bind(format_date(f.date))
    .bind(f.competitor_avg_price)
    .bind(f.competitor_min_price)
    .bind(f.competitor_max_price)
    .bind(f.competitor_p50_price)
    .bind(f.sample_size)
    .bind(f.weather_score)
    .bind(f.expected_demand_impact)
    .bind(f.market_trend_score)
    .bind(f.has_major_event as i64)
    .bind(f.event_count)
    .bind(f.data_quality_score)
    .execute(pool)
    .await?;
    Ok(())
}
