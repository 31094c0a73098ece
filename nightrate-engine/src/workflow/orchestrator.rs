//! Pricing run orchestrator
//!
//! State progression per run:
//! IDEMPOTENCY_CHECK → COLLECT_FEATURES → BASELINE → ML_OPTIMIZE? → LLM_ADJUST?
//! → MERGE → GUARDRAIL → PERSIST → PROPAGATE → DONE
//!
//! Only BASELINE and PERSIST failures are fatal. Every optional layer degrades
//! to what exists and leaves a [`RunIssue`] on the result. A run cancelled
//! before PERSIST leaves no trace in the store.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nightrate_common::events::{EventBus, PricingEvent, PublishedPrice};
use nightrate_common::time::{local_date, same_local_day};

use crate::db::{groups, overrides, properties, UPSERT_DEADLINE_MS};
use crate::demand::{ContextFeatures, DemandOracle};
use crate::error::{BridgeError, GenerateError, ValidationError};
use crate::llm::prompt::PromptInput;
use crate::llm::{ChatProvider, LlmAdjuster, LlmOutcome};
use crate::models::{
    CalendarDay, CalendarResult, GenerateOptions, IssueCode, MarketFeatures, OverrideWrite,
    PricingMethod, Property, PropertyGroup, RunIssue, RunStatus, SYSTEM_USER,
    MAX_HORIZON_DAYS,
};
use crate::pricing::{
    apply_guardrails, compute_horizon, merge_day, BaselineDay, DaySource, GuardInput,
    LlmSuggestion, MlSuggestion,
};
use crate::services::{
    propagate, EventBusHandoff, FeatureSource, PmsHandoff, QuotaGate, SqliteFeatureSource,
    FEATURE_READ_TIMEOUT,
};
use crate::workflow::clock::{Clock, SystemClock};

/// Multipliers of `base` forming the demand model price grid
const GRID_FACTORS: [f64; 8] = [0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.3, 1.4];

/// In-flight argmax requests per run; the bridge serializes them anyway
const ML_CONCURRENCY: usize = 4;

/// Wall-clock bound on PERSIST, lock retries included
const PERSIST_TIMEOUT: Duration = Duration::from_millis(UPSERT_DEADLINE_MS);

/// Hybrid pricing engine
///
/// Cheap to share behind an `Arc`; every collaborator is itself shareable.
pub struct PricingEngine {
    pool: SqlitePool,
    events: EventBus,
    features: Arc<dyn FeatureSource>,
    oracle: Option<Arc<dyn DemandOracle>>,
    llm: Option<LlmAdjuster>,
    pms: Arc<dyn PmsHandoff>,
    clock: Arc<dyn Clock>,
}

impl PricingEngine {
    /// Deterministic engine reading features from the local store
    pub fn new(pool: SqlitePool, events: EventBus) -> Self {
        Self {
            features: Arc::new(SqliteFeatureSource::new(pool.clone())),
            pms: Arc::new(EventBusHandoff::new(events.clone())),
            oracle: None,
            llm: None,
            clock: Arc::new(SystemClock),
            pool,
            events,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn DemandOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_llm(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.llm = Some(LlmAdjuster::new(provider, QuotaGate::new(self.pool.clone())));
        self
    }

    pub fn with_feature_source(mut self, features: Arc<dyn FeatureSource>) -> Self {
        self.features = features;
        self
    }

    pub fn with_pms(mut self, pms: Arc<dyn PmsHandoff>) -> Self {
        self.pms = pms;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn oracle(&self) -> Option<&Arc<dyn DemandOracle>> {
        self.oracle.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Price the horizon of `property_id`
    pub async fn generate_calendar(
        &self,
        property_id: &str,
        options: &GenerateOptions,
    ) -> Result<CalendarResult, GenerateError> {
        self.generate_calendar_cancellable(property_id, options, &CancellationToken::new())
            .await
    }

    /// Same as [`generate_calendar`](Self::generate_calendar), abandoning at
    /// the next suspension point once `cancel` fires
    pub async fn generate_calendar_cancellable(
        &self,
        property_id: &str,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<CalendarResult, GenerateError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let result = self.run(run_id, property_id, options, cancel).await;

        match &result {
            Ok(outcome) if outcome.is_skipped() => {}
            Ok(outcome) => {
                info!(
                    %run_id,
                    property_id,
                    method = %outcome.method,
                    days = outcome.days_generated,
                    synced = outcome.synced_properties.len(),
                    issues = outcome.issues.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Calendar generated"
                );
                self.events.emit_lossy(PricingEvent::RunCompleted {
                    run_id,
                    property_id: property_id.to_string(),
                    method: outcome.method.to_string(),
                    days_generated: outcome.days_generated,
                    synced_properties: outcome.synced_properties.clone(),
                    timestamp: self.clock.now(),
                });
            }
            Err(e) => {
                match e {
                    GenerateError::Cancelled => info!(%run_id, property_id, "Pricing run cancelled"),
                    GenerateError::Validation(_) | GenerateError::NotFound(_) => {
                        warn!(%run_id, property_id, code = e.code(), error = %e, "Pricing run rejected")
                    }
                    _ => error!(%run_id, property_id, code = e.code(), error = %e, "Pricing run failed"),
                }
                self.events.emit_lossy(PricingEvent::RunFailed {
                    run_id,
                    property_id: property_id.to_string(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                    timestamp: self.clock.now(),
                });
            }
        }

        result
    }

    async fn run(
        &self,
        run_id: Uuid,
        property_id: &str,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<CalendarResult, GenerateError> {
        if options.horizon_days == 0 || options.horizon_days > MAX_HORIZON_DAYS {
            return Err(ValidationError::InvalidHorizon {
                got: options.horizon_days,
                max: MAX_HORIZON_DAYS,
            }
            .into());
        }

        let property = until_cancelled(cancel, properties::get_property(&self.pool, property_id))
            .await?
            .map_err(|e| match e {
                nightrate_common::Error::NotFound(what) => GenerateError::NotFound(what),
                nightrate_common::Error::InvalidInput(msg) => ValidationError::InvalidRecord(msg).into(),
                other => GenerateError::Storage(other),
            })?;
        property.validate()?;
        let tz = property.tz()?;

        let group = until_cancelled(cancel, groups::group_for_property(&self.pool, property_id))
            .await??
            .filter(|g| g.is_main(property_id));

        let now = self.clock.now();

        // Phase: IDEMPOTENCY_CHECK
        if !options.force && self.already_priced_today(&property, group.as_ref(), now, tz) {
            info!(property_id, timezone = %tz, "Already priced today, skipping");
            self.events.emit_lossy(PricingEvent::RunSkipped {
                run_id,
                property_id: property_id.to_string(),
                timestamp: now,
            });
            return Ok(CalendarResult::skipped(property_id));
        }

        self.events.emit_lossy(PricingEvent::RunStarted {
            run_id,
            property_id: property_id.to_string(),
            trigger: options.trigger.as_str().to_string(),
            timestamp: now,
        });

        let today = local_date(now, tz);
        let mut issues = Vec::new();

        // Phase: COLLECT_FEATURES
        let features = self
            .phase_features(&property, today, options.horizon_days, cancel, &mut issues)
            .await?;

        // Phase: BASELINE
        let baselines = phase_baseline(&property, today, options.horizon_days, &features)?;

        // Phase: ML_OPTIMIZE
        let ml = self
            .phase_ml(&property, today, &baselines, &features, cancel, &mut issues)
            .await?;

        // Phase: LLM_ADJUST
        let llm = self
            .phase_llm(&property, today, &baselines, now, cancel, &mut issues)
            .await?;

        // Phases: MERGE + GUARDRAIL (sequential by date)
        let locked = self
            .locked_days(&property, &baselines, cancel)
            .await?;
        let (mut calendar, method) = merge_and_guard(&property, &baselines, &ml, &llm.days, &locked);

        // Phase: PERSIST
        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        let updated_by = options
            .triggered_by
            .clone()
            .unwrap_or_else(|| SYSTEM_USER.to_string());
        let rows: Vec<OverrideWrite> = calendar
            .iter()
            .filter(|d| !d.locked)
            .map(|d| OverrideWrite {
                date: d.date,
                price: d.price,
                reason: d.reason.clone(),
            })
            .collect();

        let report = match tokio::time::timeout(
            PERSIST_TIMEOUT,
            overrides::persist_run(
                &self.pool,
                property_id,
                group.as_ref().map(|g| g.id.as_str()),
                &rows,
                &updated_by,
                now,
            ),
        )
        .await
        {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => return Err(GenerateError::Persist(e.to_string())),
            Err(_) => return Err(GenerateError::Persist("override upsert timed out".to_string())),
        };

        // Rows locked by a user between our read and the batch commit
        if !report.skipped_locked.is_empty() {
            self.adopt_concurrent_locks(property_id, &report.skipped_locked, &mut calendar)
                .await;
        }

        // Phase: PROPAGATE
        let mut synced_properties = Vec::new();
        if let Some(group) = group.as_ref().filter(|g| g.propagates_from(property_id)) {
            let written: Vec<OverrideWrite> = rows
                .into_iter()
                .filter(|r| report.written.contains(&r.date))
                .collect();
            let propagation = propagate(&self.pool, group, &written, &updated_by, now).await;
            for (member, message) in &propagation.failed {
                issues.push(RunIssue::new(
                    IssueCode::PropagationFailed,
                    format!("{}: {}", member, message),
                ));
            }
            synced_properties = propagation.synced;
        }

        self.handoff(&property, &calendar, &synced_properties, &mut issues)
            .await;

        let locked_count = calendar.iter().filter(|d| d.locked).count();
        let mut summary = format!(
            "{} nights priced ({}), {} locked kept",
            calendar.len(),
            method,
            locked_count
        );
        if !synced_properties.is_empty() {
            summary.push_str(&format!(", synced to {} properties", synced_properties.len()));
        }

        Ok(CalendarResult {
            property_id: property_id.to_string(),
            status: RunStatus::Completed,
            days_generated: calendar.len(),
            method,
            synced_properties,
            summary,
            issues,
            calendar,
        })
    }

    /// Group timestamp wins for a group's main; compared in the local zone
    fn already_priced_today(
        &self,
        property: &Property,
        group: Option<&PropertyGroup>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> bool {
        let last = group
            .and_then(|g| g.last_pricing_update)
            .or(property.last_pricing_update);
        last.map(|instant| same_local_day(instant, now, tz))
            .unwrap_or(false)
    }

    async fn phase_features(
        &self,
        property: &Property,
        today: NaiveDate,
        horizon_days: u32,
        cancel: &CancellationToken,
        issues: &mut Vec<RunIssue>,
    ) -> Result<HashMap<NaiveDate, MarketFeatures>, GenerateError> {
        let end = today + chrono::Duration::days(i64::from(horizon_days) - 1);
        let lookup = tokio::time::timeout(
            FEATURE_READ_TIMEOUT,
            self.features.features_for(&property.location, today, end),
        );

        let features = match until_cancelled(cancel, lookup).await? {
            Ok(Ok(features)) => features,
            Ok(Err(e)) => {
                warn!(property_id = %property.id, error = %e, "Market features unavailable");
                issues.push(RunIssue::new(IssueCode::FeaturesUnavailable, e.to_string()));
                HashMap::new()
            }
            Err(_) => {
                warn!(property_id = %property.id, "Market feature read timed out");
                issues.push(RunIssue::new(
                    IssueCode::FeaturesUnavailable,
                    "feature read timed out",
                ));
                HashMap::new()
            }
        };
        debug!(property_id = %property.id, rows = features.len(), "Market features loaded");
        Ok(features)
    }

    async fn phase_ml(
        &self,
        property: &Property,
        today: NaiveDate,
        baselines: &[BaselineDay],
        features: &HashMap<NaiveDate, MarketFeatures>,
        cancel: &CancellationToken,
        issues: &mut Vec<RunIssue>,
    ) -> Result<HashMap<NaiveDate, MlSuggestion>, GenerateError> {
        let Some(oracle) = self.oracle.as_ref() else {
            return Ok(HashMap::new());
        };

        match until_cancelled(cancel, oracle.has_model(&property.id)).await? {
            Ok(true) => {}
            Ok(false) | Err(BridgeError::NoModel(_)) | Err(BridgeError::QueueFull) => {
                debug!(property_id = %property.id, "No demand model, skipping ML");
                return Ok(HashMap::new());
            }
            Err(e) => {
                debug!(property_id = %property.id, error = %e, "Demand model unavailable");
                issues.push(RunIssue::new(IssueCode::MlUnavailable, e.to_string()));
                return Ok(HashMap::new());
            }
        }

        let base = property.envelope.base;
        let requests: Vec<_> = baselines
            .iter()
            .map(|day| {
                let oracle = Arc::clone(oracle);
                let property_id = property.id.clone();
                let date = day.date;
                let context = ContextFeatures::for_night(date, today, features.get(&date));
                let grid = price_grid(base, day.price);
                async move {
                    let result = oracle.argmax_revenue(&property_id, &context, &grid).await;
                    (date, result)
                }
            })
            .collect();
        let results: Vec<(NaiveDate, Result<_, BridgeError>)> = until_cancelled(
            cancel,
            stream::iter(requests).buffered(ML_CONCURRENCY).collect(),
        )
        .await?;

        let mut suggestions = HashMap::new();
        let mut last_error = None;
        for (date, result) in results {
            match result {
                Ok(optimum) => {
                    suggestions.insert(
                        date,
                        MlSuggestion {
                            price: optimum.price,
                            confidence: optimum.confidence,
                        },
                    );
                }
                Err(e) => last_error = Some(e),
            }
        }

        if let Some(e) = last_error {
            debug!(
                property_id = %property.id,
                answered = suggestions.len(),
                error = %e,
                "Some demand model calls failed"
            );
            if suggestions.is_empty() {
                issues.push(RunIssue::new(IssueCode::MlUnavailable, e.to_string()));
            }
        }
        Ok(suggestions)
    }

    async fn phase_llm(
        &self,
        property: &Property,
        today: NaiveDate,
        baselines: &[BaselineDay],
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        issues: &mut Vec<RunIssue>,
    ) -> Result<LlmOutcome, GenerateError> {
        let (Some(adjuster), Some(pivot)) = (self.llm.as_ref(), baselines.first()) else {
            return Ok(LlmOutcome::default());
        };

        let dates: Vec<NaiveDate> = baselines.iter().map(|d| d.date).collect();
        let input = PromptInput {
            property,
            today,
            dates: &dates,
            pivot_baseline: pivot.price,
        };
        // Not raced against `cancel`: the adjuster must settle its quota first
        let outcome = adjuster.adjust(&property.owner_id, &input, now, cancel).await;
        if outcome.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        if let Some(issue) = &outcome.issue {
            issues.push(issue.clone());
        }
        Ok(outcome)
    }

    /// Locked overrides inside the horizon, as `(price, reason)`
    async fn locked_days(
        &self,
        property: &Property,
        baselines: &[BaselineDay],
        cancel: &CancellationToken,
    ) -> Result<HashMap<NaiveDate, (i64, String)>, GenerateError> {
        let (Some(first), Some(last)) = (baselines.first(), baselines.last()) else {
            return Ok(HashMap::new());
        };
        let stored = until_cancelled(
            cancel,
            overrides::get_overrides(&self.pool, &property.id, first.date, last.date),
        )
        .await??;
        Ok(stored
            .into_iter()
            .filter(|o| o.locked)
            .map(|o| (o.date, (o.price, o.reason)))
            .collect())
    }

    async fn adopt_concurrent_locks(
        &self,
        property_id: &str,
        dates: &[NaiveDate],
        calendar: &mut [CalendarDay],
    ) {
        for date in dates {
            match overrides::get_override(&self.pool, property_id, *date).await {
                Ok(Some(stored)) => {
                    if let Some(day) = calendar.iter_mut().find(|d| d.date == *date) {
                        debug!(property_id, date = %date, "Row locked during run, keeping stored price");
                        day.price = stored.price;
                        day.reason = stored.reason;
                        day.locked = true;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(property_id, date = %date, error = %e, "Re-read of locked row failed"),
            }
        }
    }

    /// PMS hand-off for the main and every synced member with an external id
    async fn handoff(
        &self,
        property: &Property,
        calendar: &[CalendarDay],
        synced: &[String],
        issues: &mut Vec<RunIssue>,
    ) {
        let (Some(first), Some(last)) = (calendar.first(), calendar.last()) else {
            return;
        };

        let mut batches: Vec<(String, Vec<PublishedPrice>)> = Vec::new();
        if let Some(external_id) = &property.external_id {
            batches.push((
                property.id.clone(),
                calendar
                    .iter()
                    .map(|d| PublishedPrice {
                        external_id: external_id.clone(),
                        date: d.date,
                        price: d.price,
                    })
                    .collect(),
            ));
        }

        if !synced.is_empty() {
            match properties::get_properties(&self.pool, synced).await {
                Ok(members) => {
                    for member in members {
                        let Some(external_id) = member.external_id.clone() else {
                            continue;
                        };
                        match overrides::get_overrides(&self.pool, &member.id, first.date, last.date).await {
                            Ok(rows) => batches.push((
                                member.id.clone(),
                                rows.into_iter()
                                    .map(|o| PublishedPrice {
                                        external_id: external_id.clone(),
                                        date: o.date,
                                        price: o.price,
                                    })
                                    .collect(),
                            )),
                            Err(e) => issues.push(RunIssue::new(
                                IssueCode::PmsHandoffFailed,
                                format!("{}: {}", member.id, e),
                            )),
                        }
                    }
                }
                Err(e) => issues.push(RunIssue::new(IssueCode::PmsHandoffFailed, e.to_string())),
            }
        }

        for (property_id, prices) in batches {
            if let Err(e) = self.pms.publish(&property_id, prices).await {
                warn!(property_id = %property_id, error = %e, "PMS hand-off failed");
                issues.push(RunIssue::new(
                    IssueCode::PmsHandoffFailed,
                    format!("{}: {}", property_id, e),
                ));
            }
        }
    }
}

/// Resolve `fut` unless `cancel` fires first
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, GenerateError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GenerateError::Cancelled),
        output = fut => Ok(output),
    }
}

fn phase_baseline(
    property: &Property,
    today: NaiveDate,
    horizon_days: u32,
    features: &HashMap<NaiveDate, MarketFeatures>,
) -> Result<Vec<BaselineDay>, GenerateError> {
    let baselines = compute_horizon(property, today, horizon_days, features);
    if let Some(bad) = baselines.iter().find(|d| !d.price.is_finite() || d.price <= 0.0) {
        return Err(GenerateError::Baseline(format!(
            "non-positive baseline {} on {}",
            bad.price, bad.date
        )));
    }
    Ok(baselines)
}

/// `round(base · {0.7 … 1.4})` plus the day's baseline, ascending and unique
pub fn price_grid(base: f64, baseline: f64) -> Vec<f64> {
    let mut grid: Vec<f64> = GRID_FACTORS
        .iter()
        .map(|f| (base * f).round())
        .chain(std::iter::once(baseline.round()))
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();
    grid.sort_by(|a, b| a.total_cmp(b));
    grid.dedup();
    grid
}

/// MERGE then GUARDRAIL over the whole horizon, in date order
fn merge_and_guard(
    property: &Property,
    baselines: &[BaselineDay],
    ml: &HashMap<NaiveDate, MlSuggestion>,
    llm: &BTreeMap<NaiveDate, LlmSuggestion>,
    locked: &HashMap<NaiveDate, (i64, String)>,
) -> (Vec<CalendarDay>, PricingMethod) {
    let envelope = property.envelope;
    let mut used_ml = false;
    let mut used_llm = false;

    let inputs: Vec<GuardInput> = baselines
        .iter()
        .map(|day| {
            let merged = merge_day(day, ml.get(&day.date), llm.get(&day.date));
            let stored = locked.get(&day.date).cloned();
            if stored.is_none() {
                used_ml |= merged.source == DaySource::Ml;
                used_llm |= merged.source == DaySource::Llm;
            }
            GuardInput {
                date: day.date,
                price: merged.price,
                baseline: day.price,
                floor: envelope.floor,
                ceiling: envelope.ceiling,
                event: day.event,
                major_event: day.major_event,
                premium: merged.premium,
                reason: merged.reason,
                locked: stored,
            }
        })
        .collect();

    let method = if used_llm {
        PricingMethod::AiHybrid
    } else if used_ml {
        PricingMethod::MlHybrid
    } else {
        PricingMethod::Deterministic
    };

    let calendar = apply_guardrails(&inputs, None)
        .into_iter()
        .zip(baselines)
        .map(|(guarded, baseline)| CalendarDay {
            date: guarded.date,
            price: guarded.price,
            reason: guarded.reason,
            locked: guarded.locked,
            baseline: baseline.price,
            event: guarded.event,
        })
        .collect();

    (calendar, method)
}
