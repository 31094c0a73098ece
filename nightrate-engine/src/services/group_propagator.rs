//! Copies the main property's emitted calendar onto synced group members
//!
//! One atomic batch per member. Member-locked rows are skipped independently
//! and reasons are copied verbatim. Membership invariants (geofence,
//! structure) are enforced when members are added, not here.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::overrides::upsert_batch;
use crate::models::{OverrideWrite, PropertyGroup};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropagationReport {
    /// Members whose batch committed
    pub synced: Vec<String>,
    /// `(member_id, error)` for batches that failed
    pub failed: Vec<(String, String)>,
    pub skipped_locked: usize,
}

pub async fn propagate(
    pool: &SqlitePool,
    group: &PropertyGroup,
    rows: &[OverrideWrite],
    updated_by: &str,
    now: DateTime<Utc>,
) -> PropagationReport {
    let mut report = PropagationReport::default();
    if !group.sync_prices || rows.is_empty() {
        return report;
    }

    for member in &group.members {
        match upsert_batch(pool, member, rows, updated_by, now).await {
            Ok(result) => {
                debug!(
                    group_id = %group.id,
                    member_id = %member,
                    written = result.written.len(),
                    skipped_locked = result.skipped_locked.len(),
                    "Member calendar synced"
                );
                report.skipped_locked += result.skipped_locked.len();
                report.synced.push(member.clone());
            }
            Err(e) => {
                warn!(group_id = %group.id, member_id = %member, error = %e, "Member sync failed");
                report.failed.push((member.clone(), e.to_string()));
            }
        }
    }

    report
}
