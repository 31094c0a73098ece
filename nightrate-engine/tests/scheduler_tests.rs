//! Hourly scheduler: subject selection, retry state and weekly retraining

mod support;

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use nightrate_common::events::PricingEvent;
use nightrate_engine::db::groups::{add_group_member, create_group};
use nightrate_engine::db::model_metrics::latest_metrics;
use nightrate_engine::db::observations::insert_observation;
use nightrate_engine::db::overrides::get_overrides;
use nightrate_engine::db::scheduler_state::{get_state, SubjectKind};
use nightrate_engine::demand::Observation;
use nightrate_engine::workflow::scheduler::eligible_subjects;
use nightrate_engine::workflow::{AutoPricingScheduler, Subject, TickReport};
use sqlx::SqlitePool;
use support::*;
use tokio_util::sync::CancellationToken;

fn utc_property(id: &str) -> nightrate_engine::models::Property {
    let mut property = sample_property(id);
    property.timezone = "UTC".to_string();
    property
}

async fn seed_observations(pool: &SqlitePool, property_id: &str, count: usize) {
    let first = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    for i in 0..count {
        let price = 80.0 + (i % 7) as f64 * 10.0;
        let obs = Observation {
            date: first + Duration::days(i as i64),
            price,
            bookings: (2.0 - price / 100.0).max(0.0),
            lead_days: (i % 30) as i64,
            weather_score: Some(60.0),
            expected_demand_impact: None,
            market_trend_score: Some(0.1),
            competitor_avg_price: Some(100.0),
        };
        insert_observation(pool, property_id, &obs).await.unwrap();
    }
}

#[tokio::test]
async fn test_groups_are_priced_through_their_main() {
    let (_dir, pool) = create_test_db().await;
    for id in ["m", "a", "solo"] {
        seed_property(&pool, &sample_property(id)).await;
    }
    let mut off = sample_property("off");
    off.auto_pricing_enabled = false;
    seed_property(&pool, &off).await;
    create_group(&pool, "g1", "Lyon flats", "m", true).await.unwrap();
    add_group_member(&pool, "g1", "a").await.unwrap();

    let subjects = eligible_subjects(&pool).await.unwrap();
    let ids: Vec<(&str, SubjectKind)> = subjects.iter().map(|s| (s.id(), s.kind())).collect();
    assert_eq!(
        ids,
        vec![("g1", SubjectKind::Group), ("solo", SubjectKind::Property)]
    );
    match &subjects[0] {
        Subject::Group { main, .. } => assert_eq!(main.id, "m"),
        other => panic!("expected group subject, got {:?}", other),
    }

    // 00:10 in Paris on 2 June
    let (engine, _clock) = engine_at(&pool, utc("2026-06-01T22:10:00Z"));
    let scheduler = AutoPricingScheduler::new(Arc::new(engine), 4);
    let report = scheduler.run_tick(&CancellationToken::new()).await;

    assert_eq!(
        report,
        TickReport {
            considered: 2,
            attempted: 2,
            succeeded: 2,
            ..Default::default()
        }
    );
    let member_rows = get_overrides(&pool, "a", date("2026-06-02"), date("2026-06-30"))
        .await
        .unwrap();
    assert_eq!(member_rows.len(), 29);
    let off_rows = get_overrides(&pool, "off", date("2026-06-02"), date("2026-06-30"))
        .await
        .unwrap();
    assert!(off_rows.is_empty());

    let group_state = get_state(&pool, SubjectKind::Group, "g1").await.unwrap();
    assert_eq!(group_state.last_successful_run, Some(utc("2026-06-01T22:10:00Z")));
    // Members and mains are not tracked separately
    let main_state = get_state(&pool, SubjectKind::Property, "m").await.unwrap();
    assert!(main_state.last_attempt.is_none());
}

#[tokio::test]
async fn test_nothing_runs_outside_local_midnight() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;

    // Noon in Paris
    let (engine, _clock) = engine_at(&pool, utc("2026-06-01T10:00:00Z"));
    let scheduler = AutoPricingScheduler::new(Arc::new(engine), 4);
    let report = scheduler.run_tick(&CancellationToken::new()).await;

    assert_eq!(report.considered, 1);
    assert_eq!(report.attempted, 0);
    let rows = get_overrides(&pool, "p1", date("2026-06-01"), date("2026-06-30"))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_second_tick_in_the_midnight_hour_is_skipped() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &utc_property("p1")).await;

    let (engine, clock) = engine_at(&pool, utc("2026-06-02T00:05:00Z"));
    let scheduler = AutoPricingScheduler::new(Arc::new(engine), 4);
    let cancel = CancellationToken::new();

    assert_eq!(scheduler.run_tick(&cancel).await.succeeded, 1);

    clock.set(utc("2026-06-02T00:45:00Z"));
    let report = scheduler.run_tick(&cancel).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.succeeded, 0);
}

#[tokio::test]
async fn test_failed_subject_is_retried_after_an_hour() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &utc_property("bad")).await;
    // floor above base: every run is rejected
    sqlx::query("UPDATE properties SET floor_price = 150 WHERE id = 'bad'")
        .execute(&pool)
        .await
        .unwrap();

    let (engine, clock) = engine_at(&pool, utc("2026-06-02T00:10:00Z"));
    let scheduler = AutoPricingScheduler::new(Arc::new(engine), 4);
    let last_error = scheduler.last_error_handle();
    let cancel = CancellationToken::new();

    let report = scheduler.run_tick(&cancel).await;
    assert_eq!(report.failed, 1);
    let state = get_state(&pool, SubjectKind::Property, "bad").await.unwrap();
    assert_eq!(state.failed_attempts, 1);
    assert!(state.last_error.is_some());
    assert!(last_error.read().await.as_deref().unwrap().starts_with("bad: "));

    // 55 minutes later: too early
    clock.set(utc("2026-06-02T01:05:00Z"));
    assert_eq!(scheduler.run_tick(&cancel).await.attempted, 0);

    clock.set(utc("2026-06-02T01:15:00Z"));
    assert_eq!(scheduler.run_tick(&cancel).await.failed, 1);
    let state = get_state(&pool, SubjectKind::Property, "bad").await.unwrap();
    assert_eq!(state.failed_attempts, 2);

    // Owner fixes the envelope; the next retry succeeds and resets the counter
    sqlx::query("UPDATE properties SET floor_price = 60 WHERE id = 'bad'")
        .execute(&pool)
        .await
        .unwrap();
    clock.set(utc("2026-06-02T02:20:00Z"));
    assert_eq!(scheduler.run_tick(&cancel).await.succeeded, 1);
    let state = get_state(&pool, SubjectKind::Property, "bad").await.unwrap();
    assert_eq!(state.failed_attempts, 0);
    assert!(state.last_error.is_none());

    clock.set(utc("2026-06-02T04:00:00Z"));
    assert_eq!(scheduler.run_tick(&cancel).await.attempted, 0);
}

#[tokio::test]
async fn test_cancelled_tick_records_nothing() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &utc_property("p1")).await;

    let (engine, _clock) = engine_at(&pool, utc("2026-06-02T00:05:00Z"));
    let scheduler = AutoPricingScheduler::new(Arc::new(engine), 4);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = scheduler.run_tick(&cancel).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded + report.failed + report.skipped, 0);
    assert_eq!(
        get_state(&pool, SubjectKind::Property, "p1").await.unwrap(),
        Default::default()
    );
}

#[tokio::test]
async fn test_stale_models_are_retrained_weekly() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;
    seed_property(&pool, &sample_property("thin")).await;
    seed_observations(&pool, "p1", 40).await;
    seed_observations(&pool, "thin", 29).await;

    let oracle = Arc::new(FakeOracle::with_optimum(120.0, 0.6));
    let (engine, clock) = engine_at(&pool, utc("2026-06-01T10:00:00Z"));
    let engine = Arc::new(engine.with_oracle(oracle.clone()));
    let mut events = engine.events().subscribe();
    let scheduler = AutoPricingScheduler::new(Arc::clone(&engine), 4);
    let cancel = CancellationToken::new();

    let report = scheduler.run_tick(&cancel).await;
    assert_eq!(report.retrained, 1);
    assert_eq!(oracle.trained(), vec![("p1".to_string(), 40)]);

    let metrics = latest_metrics(&pool, "p1").await.unwrap().unwrap();
    assert_eq!(metrics.model_version, 1);
    assert_eq!(metrics.trained_at, utc("2026-06-01T10:00:00Z"));
    match events.try_recv().unwrap() {
        PricingEvent::ModelRetrained { property_id, model_version, .. } => {
            assert_eq!(property_id, "p1");
            assert_eq!(model_version, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Fresh model: nothing to do until a week has passed
    clock.advance(Duration::days(3));
    assert_eq!(scheduler.run_tick(&cancel).await.retrained, 0);
    assert_eq!(oracle.trained().len(), 1);

    clock.advance(Duration::days(5));
    assert_eq!(scheduler.run_tick(&cancel).await.retrained, 1);
    assert_eq!(oracle.trained().len(), 2);
}

#[tokio::test]
async fn test_losing_candidate_still_waits_a_week() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;
    seed_observations(&pool, "p1", 35).await;

    let oracle = Arc::new(FakeOracle {
        replace_on_train: false,
        ..FakeOracle::with_optimum(120.0, 0.6)
    });
    let (engine, clock) = engine_at(&pool, utc("2026-06-01T10:00:00Z"));
    let engine = Arc::new(engine.with_oracle(oracle.clone()));
    let mut events = engine.events().subscribe();
    let scheduler = AutoPricingScheduler::new(Arc::clone(&engine), 4);
    let cancel = CancellationToken::new();

    assert_eq!(scheduler.run_tick(&cancel).await.retrained, 0);
    assert_eq!(oracle.trained().len(), 1);
    assert!(latest_metrics(&pool, "p1").await.unwrap().is_some());
    assert!(events.try_recv().is_err());

    clock.advance(Duration::hours(1));
    scheduler.run_tick(&cancel).await;
    assert_eq!(oracle.trained().len(), 1);
}

#[tokio::test]
async fn test_tick_rotates_old_quota_rows() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;
    let gate = nightrate_engine::services::QuotaGate::new(pool.clone());
    let old = utc("2026-04-01T12:00:00Z");
    let recent = utc("2026-05-20T12:00:00Z");
    gate.check_and_increment("owner-1", old).await.unwrap();
    gate.check_and_increment("owner-1", recent).await.unwrap();

    let (engine, _clock) = engine_at(&pool, utc("2026-06-01T10:00:00Z"));
    let scheduler = AutoPricingScheduler::new(Arc::new(engine), 4);
    scheduler.run_tick(&CancellationToken::new()).await;

    assert_eq!(gate.usage("owner-1", old).await.unwrap().calls_count, 0);
    assert_eq!(gate.usage("owner-1", recent).await.unwrap().calls_count, 1);
}

#[tokio::test]
async fn test_scheduler_runs_on_spawned_tasks() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &utc_property("p1")).await;
    let (engine, _clock) = engine_at(&pool, utc("2026-06-02T00:05:00Z"));
    let scheduler = Arc::new(AutoPricingScheduler::new(Arc::new(engine), 4));

    let tick = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_tick(&CancellationToken::new()).await })
    };
    assert_eq!(tick.await.unwrap().succeeded, 1);

    let cancel = CancellationToken::new();
    let forever = tokio::spawn(Arc::clone(&scheduler).run_forever(cancel.clone()));
    cancel.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), forever)
        .await
        .unwrap()
        .unwrap();
}
