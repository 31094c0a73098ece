//! Hourly auto-pricing scheduler
//!
//! Every tick selects eligible subjects (auto-priced properties and synced
//! groups), runs them through the same `generate_calendar` path as on-demand
//! requests with bounded fan-out, records per-subject state, and retrains
//! stale demand models.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nightrate_common::events::PricingEvent;
use nightrate_common::time::{local_date, next_hour_boundary, same_local_day};
use nightrate_common::Result;

use crate::db::model_metrics::{insert_metrics, ModelMetrics};
use crate::db::observations::{observations_for, properties_due_for_retrain};
use crate::db::scheduler_state::{get_state, record_failure, record_success, SchedulerState, SubjectKind};
use crate::db::{groups, properties, quota};
use crate::demand::training::MIN_OBSERVATIONS;
use crate::error::GenerateError;
use crate::models::{GenerateOptions, Property, PropertyGroup, Trigger};
use crate::workflow::orchestrator::PricingEngine;

/// Models older than this are retrained
pub const RETRAIN_AFTER_DAYS: i64 = 7;

/// Quota usage rows are kept this long
pub const QUOTA_RETENTION_DAYS: i64 = 30;

/// Something the scheduler prices
#[derive(Debug, Clone)]
pub enum Subject {
    Property(Property),
    /// A synced group, priced through its main property
    Group { group: PropertyGroup, main: Property },
}

impl Subject {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::Property(_) => SubjectKind::Property,
            Subject::Group { .. } => SubjectKind::Group,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Subject::Property(property) => &property.id,
            Subject::Group { group, .. } => &group.id,
        }
    }

    /// Property whose run prices this subject
    pub fn pricing_property(&self) -> &Property {
        match self {
            Subject::Property(property) => property,
            Subject::Group { main, .. } => main,
        }
    }
}

/// Subjects for this tick
///
/// Synced groups whose main has auto pricing on, then auto-priced properties
/// that are neither such a main nor a member of a synced group.
pub async fn eligible_subjects(pool: &sqlx::SqlitePool) -> Result<Vec<Subject>> {
    let mut subjects = Vec::new();
    let mut covered: HashSet<String> = HashSet::new();

    for group in groups::list_sync_groups(pool).await? {
        covered.extend(group.members.iter().cloned());
        match properties::get_property(pool, &group.main_property_id).await {
            Ok(main) if main.auto_pricing_enabled => {
                covered.insert(main.id.clone());
                subjects.push(Subject::Group { group, main });
            }
            Ok(_) => {}
            Err(e) => warn!(group_id = %group.id, error = %e, "Group main not loadable, skipping"),
        }
    }

    for property in properties::list_auto_priced(pool).await? {
        if !covered.contains(&property.id) {
            subjects.push(Subject::Property(property));
        }
    }

    Ok(subjects)
}

/// First tick of a new local day, or a same-day retry at least one hour
/// after a failure
///
/// The new day is detected by comparing local dates an hour apart, so zones
/// whose DST jump skips local 00:xx still get their daily slot.
pub fn is_eligible(state: &SchedulerState, now: DateTime<Utc>, tz: Tz) -> bool {
    if starts_local_day(now, tz) {
        return true;
    }
    match state.last_attempt {
        Some(last_attempt) if state.failed_attempts > 0 => {
            same_local_day(last_attempt, now, tz) && now - last_attempt >= Duration::hours(1)
        }
        _ => false,
    }
}

/// True during the first hour of the local calendar day containing `now`
fn starts_local_day(now: DateTime<Utc>, tz: Tz) -> bool {
    local_date(now - Duration::hours(1), tz) != local_date(now, tz)
}

/// Outcome counters for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub considered: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub retrained: usize,
}

enum SubjectOutcome {
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

pub struct AutoPricingScheduler {
    engine: Arc<PricingEngine>,
    concurrency: usize,
    last_error: Arc<RwLock<Option<String>>>,
}

impl AutoPricingScheduler {
    pub fn new(engine: Arc<PricingEngine>, concurrency: usize) -> Self {
        Self {
            engine,
            concurrency: concurrency.max(1),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Shared slot holding the most recent tick-level error
    pub fn last_error_handle(&self) -> Arc<RwLock<Option<String>>> {
        Arc::clone(&self.last_error)
    }

    /// One scheduler pass
    pub async fn run_tick(&self, cancel: &CancellationToken) -> TickReport {
        let now = self.engine.now();
        let pool = self.engine.pool();
        let mut report = TickReport::default();

        let subjects = match eligible_subjects(pool).await {
            Ok(subjects) => subjects,
            Err(e) => {
                error!(error = %e, "Failed to list scheduler subjects");
                *self.last_error.write().await = Some(e.to_string());
                return report;
            }
        };
        report.considered = subjects.len();

        let mut due = Vec::new();
        for subject in subjects {
            let tz = match subject.pricing_property().tz() {
                Ok(tz) => tz,
                Err(e) => {
                    warn!(subject_id = subject.id(), error = %e, "Subject has invalid timezone");
                    continue;
                }
            };
            let state = match get_state(pool, subject.kind(), subject.id()).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(subject_id = subject.id(), error = %e, "Scheduler state unreadable");
                    continue;
                }
            };
            if is_eligible(&state, now, tz) {
                due.push(subject);
            }
        }
        report.attempted = due.len();
        debug!(considered = report.considered, due = due.len(), "Scheduler tick");

        // Owned futures only: the tick runs inside a spawned task
        let runs: Vec<_> = due
            .into_iter()
            .map(|subject| {
                run_subject(
                    Arc::clone(&self.engine),
                    Arc::clone(&self.last_error),
                    subject,
                    cancel.clone(),
                )
            })
            .collect();
        let outcomes: Vec<SubjectOutcome> = stream::iter(runs)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                SubjectOutcome::Completed => report.succeeded += 1,
                SubjectOutcome::Skipped => report.skipped += 1,
                SubjectOutcome::Failed => report.failed += 1,
                SubjectOutcome::Cancelled => {}
            }
        }

        if !cancel.is_cancelled() {
            report.retrained = self.retrain_due(now).await;
            self.rotate_quota(now).await;
        }

        info!(
            considered = report.considered,
            attempted = report.attempted,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            retrained = report.retrained,
            "Scheduler tick finished"
        );
        report
    }

    /// Weekly retraining of demand models with enough history
    async fn retrain_due(&self, now: DateTime<Utc>) -> usize {
        let Some(oracle) = self.engine.oracle() else {
            return 0;
        };
        let pool = self.engine.pool();

        let due = match properties_due_for_retrain(
            pool,
            now,
            Duration::days(RETRAIN_AFTER_DAYS),
            MIN_OBSERVATIONS as i64,
        )
        .await
        {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Retrain selection failed");
                return 0;
            }
        };

        let mut retrained = 0;
        for property_id in due {
            let observations = match observations_for(pool, &property_id).await {
                Ok(observations) => observations,
                Err(e) => {
                    warn!(property_id = %property_id, error = %e, "Observations unreadable");
                    continue;
                }
            };

            let outcome = match oracle.train(&property_id, &observations).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(property_id = %property_id, error = %e, "Training skipped");
                    continue;
                }
            };

            // Stamped even when the candidate lost, so the property waits a week
            let metrics = ModelMetrics {
                property_id: property_id.clone(),
                model_version: outcome.version,
                val_rmse: outcome.val_rmse,
                trained_at: now,
                feature_importance: outcome.feature_importance.clone(),
            };
            if let Err(e) = insert_metrics(pool, &metrics).await {
                warn!(property_id = %property_id, error = %e, "Metrics not recorded");
                continue;
            }

            if outcome.replaced {
                retrained += 1;
                info!(
                    property_id = %property_id,
                    version = outcome.version,
                    val_rmse = outcome.val_rmse,
                    "Demand model retrained"
                );
                self.engine.events().emit_lossy(PricingEvent::ModelRetrained {
                    property_id: property_id.clone(),
                    model_version: outcome.version,
                    val_rmse: outcome.val_rmse,
                    timestamp: now,
                });
            }
        }
        retrained
    }

    async fn rotate_quota(&self, now: DateTime<Utc>) {
        let keep_from = (now - Duration::days(QUOTA_RETENTION_DAYS)).date_naive();
        match quota::purge_before(self.engine.pool(), keep_from).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, %keep_from, "Old quota rows rotated out"),
            Err(e) => warn!(error = %e, "Quota rotation failed"),
        }
    }

    /// Tick at every UTC hour boundary until `cancel` fires
    pub async fn run_forever(self: Arc<Self>, cancel: CancellationToken) {
        info!(concurrency = self.concurrency, "Auto-pricing scheduler started");
        loop {
            let now = Utc::now();
            let wait = (next_hour_boundary(now) - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            self.run_tick(&cancel).await;
        }
        info!("Auto-pricing scheduler stopped");
    }
}

/// Price one subject and record its scheduler state
///
/// Takes owned handles so the future is `'static` and can ride a spawned task.
async fn run_subject(
    engine: Arc<PricingEngine>,
    last_error: Arc<RwLock<Option<String>>>,
    subject: Subject,
    cancel: CancellationToken,
) -> SubjectOutcome {
    let pool = engine.pool();
    let property_id = subject.pricing_property().id.as_str();
    let options = GenerateOptions {
        force: false,
        trigger: Trigger::Scheduler,
        ..Default::default()
    };

    let result = engine
        .generate_calendar_cancellable(property_id, &options, &cancel)
        .await;
    let now = engine.now();

    let (outcome, recorded) = match result {
        Ok(calendar) => {
            let outcome = if calendar.is_skipped() {
                SubjectOutcome::Skipped
            } else {
                SubjectOutcome::Completed
            };
            (outcome, record_success(pool, subject.kind(), subject.id(), now).await)
        }
        Err(GenerateError::Cancelled) => return SubjectOutcome::Cancelled,
        Err(e) => {
            *last_error.write().await = Some(format!("{}: {}", subject.id(), e));
            let message = e.to_string();
            (
                SubjectOutcome::Failed,
                record_failure(pool, subject.kind(), subject.id(), now, &message).await,
            )
        }
    };

    if let Err(e) = recorded {
        warn!(subject_id = subject.id(), error = %e, "Scheduler state not recorded");
    }
    outcome
}
