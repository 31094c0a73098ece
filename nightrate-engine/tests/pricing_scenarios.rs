//! End-to-end calendar runs against a file-backed database

mod support;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nightrate_engine::db::features::upsert_features;
use nightrate_engine::db::groups::{add_group_member, create_group};
use nightrate_engine::db::overrides::{get_override, set_manual_override};
use nightrate_engine::models::{
    GenerateOptions, IssueCode, MarketFeatures, PriceEnvelope, PricingMethod, Strategy,
};
use nightrate_engine::services::QuotaGate;
use support::*;

fn june_first() -> DateTime<Utc> {
    // 10:00 in Paris
    utc("2026-06-01T08:00:00Z")
}

#[tokio::test]
async fn test_s1_deterministic_high_season_weekend() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;
    let (engine, _clock) = engine_at(&pool, june_first());

    let result = engine
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(result.method, PricingMethod::Deterministic);
    assert_eq!(result.days_generated, 180);
    assert!(result.issues.is_empty(), "issues: {:?}", result.issues);

    let day = result.day(date("2026-07-18")).unwrap();
    assert!((day.baseline - 200.0).abs() < 1e-9);
    assert_eq!(day.price, 199);
    assert!(day.reason.contains("High season"));
    assert!(day.reason.contains("Weekend"));

    let stored = get_override(&pool, "p1", date("2026-07-18")).await.unwrap().unwrap();
    assert_eq!(stored.price, 199);
    assert!(!stored.locked);
    assert_eq!(stored.updated_by, "system");
}

#[tokio::test]
async fn test_s2_event_uplift_uses_relaxed_ceiling() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;
    upsert_features(
        &pool,
        &MarketFeatures {
            city: "Lyon".into(),
            country: "FR".into(),
            date: date("2026-07-04"),
            expected_demand_impact: Some(120.0),
            has_major_event: true,
            event_count: 1,
            data_quality_score: Some(0.9),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let (engine, _clock) = engine_at(&pool, june_first());

    let result = engine
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();

    // Saturday: 100 · 1.6 · 1.25 · 2.2 = 440, above the 300 ceiling but under 450
    let day = result.day(date("2026-07-04")).unwrap();
    assert!((day.baseline - 440.0).abs() < 1e-9);
    assert_eq!(day.price, 439);
    assert!(day.event);
    assert!(day.reason.contains("Major event"));

    // The neighbouring night is not tagged
    assert!(!result.day(date("2026-07-03")).unwrap().event);
}

#[tokio::test]
async fn test_s3_prudent_last_minute_decays_toward_floor() {
    let (_dir, pool) = create_test_db().await;
    let mut property = sample_property("p1");
    property.strategy = Strategy::Prudent;
    property.envelope = PriceEnvelope::new(70.0, 120.0, None);
    property.rules.weekend_markup_pct = 0.0;
    seed_property(&pool, &property).await;

    // Monday 6 April, 10:00 in Paris
    let (engine, _clock) = engine_at(&pool, utc("2026-04-06T08:00:00Z"));
    let result = engine
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();

    let day = result.day(date("2026-04-09")).unwrap();
    assert!((day.baseline - 77.142857).abs() < 1e-4);
    assert_eq!(day.price, 79);
    assert!(day.reason.contains("Last minute"));

    // Same-day night sits on the floor
    assert_eq!(result.calendar[0].date, date("2026-04-06"));
    assert!(result.calendar[0].price >= 70);
}

#[tokio::test]
async fn test_s4_locked_day_is_returned_unchanged() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;
    let locked_at = utc("2026-05-20T12:00:00Z");
    set_manual_override(
        &pool,
        "p1",
        date("2026-08-15"),
        250,
        "Owner: family wedding",
        true,
        "owner-1",
        locked_at,
    )
    .await
    .unwrap();
    let (engine, _clock) = engine_at(&pool, june_first());

    let result = engine
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();

    let day = result.day(date("2026-08-15")).unwrap();
    assert_eq!(day.price, 250);
    assert!(day.locked);
    assert_eq!(day.reason, "Owner: family wedding");
    assert_eq!(result.days_generated, 180);

    let stored = get_override(&pool, "p1", date("2026-08-15")).await.unwrap().unwrap();
    assert_eq!(stored.price, 250);
    assert!(stored.locked);
    assert_eq!(stored.updated_by, "owner-1");
    assert_eq!(stored.updated_at, locked_at);
}

#[tokio::test]
async fn test_s5_llm_prose_falls_back_to_deterministic() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;

    let provider = Arc::new(ScriptedProvider::answering(
        "I'm sorry, I cannot produce a pricing calendar right now.",
    ));
    let (engine, _clock) = engine_at(&pool, june_first());
    let engine = engine.with_llm(provider.clone());

    let result = engine
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(result.method, PricingMethod::Deterministic);
    assert!(result.has_issue(IssueCode::LlmParseError));

    // Quota restored, tokens still accounted
    let usage = QuotaGate::new(pool.clone())
        .usage("owner-1", june_first())
        .await
        .unwrap();
    assert_eq!(usage.calls_count, 0);
    assert_eq!(usage.tokens_used, 900);

    // Same prices as a run without the LLM layer
    let (_dir2, pool2) = create_test_db().await;
    seed_property(&pool2, &sample_property("p1")).await;
    let (plain, _clock) = engine_at(&pool2, june_first());
    let expected = plain
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(result.calendar, expected.calendar);
}

#[tokio::test]
async fn test_s6_group_propagation_skips_member_locks() {
    let (_dir, pool) = create_test_db().await;
    for id in ["m", "a", "b"] {
        seed_property(&pool, &sample_property(id)).await;
    }
    create_group(&pool, "g1", "Lyon flats", "m", true).await.unwrap();
    add_group_member(&pool, "g1", "a").await.unwrap();
    add_group_member(&pool, "g1", "b").await.unwrap();
    set_manual_override(
        &pool,
        "a",
        date("2026-09-01"),
        140,
        "Owner price",
        true,
        "owner-1",
        utc("2026-05-01T00:00:00Z"),
    )
    .await
    .unwrap();
    let (engine, _clock) = engine_at(&pool, june_first());

    let result = engine
        .generate_calendar("m", &GenerateOptions::default())
        .await
        .unwrap();

    let main_price = result.day(date("2026-09-01")).unwrap().price;
    let mut synced = result.synced_properties.clone();
    synced.sort();
    assert_eq!(synced, vec!["a".to_string(), "b".to_string()]);

    let m = get_override(&pool, "m", date("2026-09-01")).await.unwrap().unwrap();
    let a = get_override(&pool, "a", date("2026-09-01")).await.unwrap().unwrap();
    let b = get_override(&pool, "b", date("2026-09-01")).await.unwrap().unwrap();
    assert_eq!(m.price, main_price);
    assert_eq!(b.price, main_price);
    assert_eq!(b.reason, m.reason);
    assert_eq!(a.price, 140);
    assert!(a.locked);

    // Other nights of the locked member still follow the main
    let a_next = get_override(&pool, "a", date("2026-09-02")).await.unwrap().unwrap();
    assert_eq!(a_next.price, result.day(date("2026-09-02")).unwrap().price);
}

#[tokio::test]
async fn test_llm_prices_are_guarded_and_prefixed() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;

    let answer = calendar_answer(&[
        (date("2026-06-10"), 180, "Fête de la musique warm-up[1]"),
        (date("2026-06-11"), 5000, "Unrealistic spike"),
    ]);
    let (engine, _clock) = engine_at(&pool, june_first());
    let engine = engine.with_llm(Arc::new(ScriptedProvider::answering(answer)));

    let result = engine
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(result.method, PricingMethod::AiHybrid);
    assert!(result.issues.is_empty(), "issues: {:?}", result.issues);

    let priced = result.day(date("2026-06-10")).unwrap();
    assert!(priced.reason.starts_with("AI: "));
    assert!(!priced.reason.contains("[1]"));
    let ceiling = 300;
    assert!(priced.price <= ceiling);

    let spike = result.day(date("2026-06-11")).unwrap();
    assert!(spike.price <= ceiling);

    // Nights the model skipped keep the deterministic trace
    let skipped = result.day(date("2026-06-20")).unwrap();
    assert!(!skipped.reason.starts_with("AI: "));

    let usage = QuotaGate::new(pool.clone())
        .usage("owner-1", june_first())
        .await
        .unwrap();
    assert_eq!(usage.calls_count, 1);
}

#[tokio::test]
async fn test_demand_model_blends_toward_optimum() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;

    let (engine, _clock) = engine_at(&pool, june_first());
    let engine = engine.with_oracle(Arc::new(FakeOracle::with_optimum(140.0, 0.5)));

    let result = engine
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(result.method, PricingMethod::MlHybrid);

    // Wednesday in late September, early booking: baseline 100 · 1.1 · 1.1 = 121
    let day = result.day(date("2026-09-30")).unwrap();
    assert!((day.baseline - 121.0).abs() < 1e-9);
    assert!(day.reason.ends_with("Demand model"));
    // 121 + (140 - 121) · 0.5 = 130.5
    assert_eq!(day.price, 129);
}

#[tokio::test]
async fn test_missing_model_is_silent() {
    let (_dir, pool) = create_test_db().await;
    seed_property(&pool, &sample_property("p1")).await;

    let (engine, _clock) = engine_at(&pool, june_first());
    let engine = engine.with_oracle(Arc::new(FakeOracle::without_model()));

    let result = engine
        .generate_calendar("p1", &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(result.method, PricingMethod::Deterministic);
    assert!(!result.has_issue(IssueCode::MlUnavailable));
}

#[tokio::test]
async fn test_pms_receives_main_and_synced_members() {
    let (_dir, pool) = create_test_db().await;
    let mut main = sample_property("m");
    main.external_id = Some("airbnb-m".into());
    seed_property(&pool, &main).await;
    let mut member = sample_property("a");
    member.external_id = Some("airbnb-a".into());
    seed_property(&pool, &member).await;
    seed_property(&pool, &sample_property("no-ext")).await;
    create_group(&pool, "g1", "Lyon flats", "m", true).await.unwrap();
    add_group_member(&pool, "g1", "a").await.unwrap();
    add_group_member(&pool, "g1", "no-ext").await.unwrap();

    let pms = Arc::new(RecordingPms::default());
    let (engine, _clock) = engine_at(&pool, june_first());
    let engine = engine.with_pms(pms.clone());

    engine
        .generate_calendar("m", &GenerateOptions::default())
        .await
        .unwrap();

    let batches = pms.batches();
    let ids: Vec<&str> = batches.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["m", "a"]);
    assert_eq!(batches[0].1.len(), 180);
    assert!(batches[1].1.iter().all(|p| p.external_id == "airbnb-a"));
}
