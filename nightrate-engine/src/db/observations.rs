//! Booking observations used to train demand models

use chrono::{DateTime, Duration, Utc};
use nightrate_common::Result;
use sqlx::{Row, SqlitePool};

use crate::db::{format_date, format_instant, parse_date};
use crate::demand::Observation;

pub async fn insert_observation(pool: &SqlitePool, property_id: &str, obs: &Observation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO demand_observations (
            property_id, date, price, bookings, lead_days, weather_score,
            expected_demand_impact, market_trend_score, competitor_avg_price
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(property_id)
    .bind(format_date(obs.date))
    .bind(obs.price)
    .bind(obs.bookings)
    .bind(obs.lead_days)
    .bind(obs.weather_score)
    .bind(obs.expected_demand_impact)
    .bind(obs.market_trend_score)
    .bind(obs.competitor_avg_price)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn observations_for(pool: &SqlitePool, property_id: &str) -> Result<Vec<Observation>> {
    let rows = sqlx::query(
        r#"
        SELECT date, price, bookings, lead_days, weather_score, expected_demand_impact,
               market_trend_score, competitor_avg_price
        FROM demand_observations
        WHERE property_id = ?
        ORDER BY date, id
        "#,
    )
    .bind(property_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let date: String = row.get("date");
            Ok(Observation {
                date: parse_date(&date)?,
                price: row.get("price"),
                bookings: row.get("bookings"),
                lead_days: row.get("lead_days"),
                weather_score: row.get("weather_score"),
                expected_demand_impact: row.get("expected_demand_impact"),
                market_trend_score: row.get("market_trend_score"),
                competitor_avg_price: row.get("competitor_avg_price"),
            })
        })
        .collect()
}

/// Properties with at least `min_observations` rows whose latest training is
/// older than `max_age` (or that were never trained)
pub async fn properties_due_for_retrain(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    max_age: Duration,
    min_observations: i64,
) -> Result<Vec<String>> {
    let cutoff = format_instant(now - max_age);
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT o.property_id
        FROM demand_observations o
        GROUP BY o.property_id
        HAVING COUNT(*) >= ?
           AND COALESCE(
                 (SELECT MAX(m.trained_at) FROM pricing_model_metrics m WHERE m.property_id = o.property_id),
                 ''
               ) < ?
        ORDER BY o.property_id
        "#,
    )
    .bind(min_observations)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
