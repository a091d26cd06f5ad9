// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Settlement computation: aggregate validated check-ins per academy for a
//! payout period and upsert draft payout runs.
//!
//! Recomputation is idempotent: amounts are integer cents derived only from
//! the event snapshots, and rows already `paid` are never overwritten. A
//! computation error for one academy is recorded on that academy's row and
//! never aborts the rest of the batch.

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::{Academy, CheckinEvent, PayoutRun, PeriodStatus, Plan, RunStatus};
use crate::time_utils::{format_utc_rfc3339, parse_day_key};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Result of one settlement computation.
#[derive(Debug, Serialize)]
pub struct SettlementReport {
    pub period_id: String,
    /// Rows written as draft
    pub computed: u32,
    /// Rows written as failed (per-academy computation errors)
    pub failed: u32,
    /// Rows already paid and left untouched
    pub skipped_paid: u32,
    /// Sum of draft amounts (cents)
    pub total_cents: i64,
    pub rows: Vec<RunOutcome>,
}

/// One academy's outcome in the report.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub academy_id: u64,
    pub checkin_count: u32,
    pub amount_cents: i64,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Compute the clamped amount owed to one academy for a period.
///
/// `events` must be the academy's validated check-ins in the period. Errors
/// are plain strings so the caller can record them per row without aborting
/// sibling academies.
pub fn compute_academy_amount(
    events: &[&CheckinEvent],
    academy: &Academy,
    plans: &HashMap<String, Plan>,
    custom_rate_respects_clamps: bool,
) -> std::result::Result<i64, String> {
    let count = events.len() as i64;

    if let Some(custom_rate) = academy.custom_repasse_cents {
        let raw = custom_rate * count;
        if !custom_rate_respects_clamps {
            // Policy default: a custom facility rate overrides the clamps
            return Ok(raw);
        }
        let (min, max) = clamp_bounds(events, plans)?;
        return Ok(raw.clamp(min, max));
    }

    // Plan rates were snapshotted at admission; aggregate per rate then sum.
    let mut raw = 0i64;
    for event in events {
        if !plans.contains_key(&event.plan_id) {
            return Err(format!(
                "missing plan data: plan {} referenced by check-in {}",
                event.plan_id, event.id
            ));
        }
        raw += event.rate_cents;
    }

    let (min, max) = clamp_bounds(events, plans)?;
    Ok(raw.clamp(min, max))
}

/// Clamp bounds for a facility-period total. With mixed plan types the widest
/// bounds win, so the clamp never forces an amount outside every contributing
/// plan's own range.
fn clamp_bounds(
    events: &[&CheckinEvent],
    plans: &HashMap<String, Plan>,
) -> std::result::Result<(i64, i64), String> {
    let mut min: Option<i64> = None;
    let mut max: Option<i64> = None;

    for event in events {
        let plan = plans.get(&event.plan_id).ok_or_else(|| {
            format!(
                "missing plan data: plan {} referenced by check-in {}",
                event.plan_id, event.id
            )
        })?;
        min = Some(min.map_or(plan.repasse_min_cents, |m| m.min(plan.repasse_min_cents)));
        max = Some(max.map_or(plan.repasse_max_cents, |m| m.max(plan.repasse_max_cents)));
    }

    match (min, max) {
        (Some(min), Some(max)) if min <= max => Ok((min, max)),
        (Some(min), Some(max)) => Err(format!("inconsistent clamp bounds: min {} > max {}", min, max)),
        _ => Err("no contributing check-ins".to_string()),
    }
}

/// Pure per-academy computation over a period's validated events.
///
/// Returns one entry per academy with at least one validated check-in, keyed
/// and ordered by academy id so recomputation is deterministic.
pub fn compute_runs(
    events: &[CheckinEvent],
    academies: &HashMap<u64, Academy>,
    plans: &HashMap<String, Plan>,
    custom_rate_respects_clamps: bool,
) -> Vec<(u64, std::result::Result<(u32, i64), String>)> {
    let mut by_academy: BTreeMap<u64, Vec<&CheckinEvent>> = BTreeMap::new();
    for event in events.iter().filter(|e| e.is_validated()) {
        by_academy.entry(event.academy_id).or_default().push(event);
    }

    by_academy
        .into_iter()
        .map(|(academy_id, events)| {
            let count = events.len() as u32;
            let result = match academies.get(&academy_id) {
                Some(academy) => {
                    compute_academy_amount(&events, academy, plans, custom_rate_respects_clamps)
                        .map(|amount| (count, amount))
                }
                None => Err(format!("academy {} not found", academy_id)),
            };
            (academy_id, result)
        })
        .collect()
}

/// Settlement computer over the persistent store.
pub struct SettlementComputer {
    db: FirestoreDb,
    locks: Arc<DashMap<String, ()>>,
    custom_rate_respects_clamps: bool,
}

/// Removes the period's advisory lock when the computation ends.
struct PeriodLock {
    locks: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for PeriodLock {
    fn drop(&mut self) {
        self.locks.remove(&self.key);
    }
}

impl SettlementComputer {
    pub fn new(
        db: FirestoreDb,
        locks: Arc<DashMap<String, ()>>,
        custom_rate_respects_clamps: bool,
    ) -> Self {
        Self {
            db,
            locks,
            custom_rate_respects_clamps,
        }
    }

    /// Compute (or recompute) payout runs for a period.
    pub async fn compute_period(&self, period_id: &str) -> Result<SettlementReport> {
        let period = self
            .db
            .get_period(period_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payout period {} not found", period_id)))?;

        if period.status != PeriodStatus::Open {
            return Err(AppError::InvalidPeriodState(format!(
                "period {} is closed",
                period_id
            )));
        }

        // Advisory lock: one computation per period per process. Different
        // periods may compute concurrently.
        if self.locks.insert(period_id.to_string(), ()).is_some() {
            return Err(AppError::InvalidPeriodState(format!(
                "period {} is already being computed",
                period_id
            )));
        }
        let _lock = PeriodLock {
            locks: self.locks.clone(),
            key: period_id.to_string(),
        };

        let starts_on = parse_day_key(&period.starts_on)
            .ok_or_else(|| AppError::Database(format!("malformed period start {}", period.starts_on)))?;
        let ends_on = parse_day_key(&period.ends_on)
            .ok_or_else(|| AppError::Database(format!("malformed period end {}", period.ends_on)))?;

        let events = self
            .db
            .get_validated_checkins_between(starts_on, ends_on)
            .await?;

        // Resolve referenced academies and plans once up front
        let mut academies: HashMap<u64, Academy> = HashMap::new();
        let mut plans: HashMap<String, Plan> = HashMap::new();
        for event in &events {
            if !academies.contains_key(&event.academy_id) {
                if let Some(a) = self.db.get_academy(event.academy_id).await? {
                    academies.insert(event.academy_id, a);
                }
            }
            if !plans.contains_key(&event.plan_id) {
                if let Some(p) = self.db.get_plan(&event.plan_id).await? {
                    plans.insert(event.plan_id.clone(), p);
                }
            }
        }

        let computations =
            compute_runs(&events, &academies, &plans, self.custom_rate_respects_clamps);
        let computed_at = format_utc_rfc3339(Utc::now());

        let mut report = SettlementReport {
            period_id: period_id.to_string(),
            computed: 0,
            failed: 0,
            skipped_paid: 0,
            total_cents: 0,
            rows: Vec::with_capacity(computations.len()),
        };

        for (academy_id, computation) in computations {
            let run_id = PayoutRun::run_id(period_id, academy_id);

            // Paid rows are settled money; recomputation never touches them.
            if let Some(existing) = self.db.get_run(&run_id).await? {
                if existing.status == RunStatus::Paid {
                    report.skipped_paid += 1;
                    report.rows.push(RunOutcome {
                        academy_id,
                        checkin_count: existing.checkin_count,
                        amount_cents: existing.amount_cents,
                        status: RunStatus::Paid,
                        error: None,
                    });
                    continue;
                }
            }

            let run = match computation {
                Ok((count, amount)) => {
                    report.computed += 1;
                    report.total_cents += amount;
                    PayoutRun {
                        id: run_id,
                        period_id: period_id.to_string(),
                        academy_id,
                        checkin_count: count,
                        amount_cents: amount,
                        status: RunStatus::Draft,
                        error: None,
                        computed_at: computed_at.clone(),
                    }
                }
                Err(cause) => {
                    tracing::error!(
                        period_id,
                        academy_id,
                        error = %cause,
                        "Settlement computation failed for academy"
                    );
                    report.failed += 1;
                    PayoutRun {
                        id: run_id,
                        period_id: period_id.to_string(),
                        academy_id,
                        checkin_count: 0,
                        amount_cents: 0,
                        status: RunStatus::Failed,
                        error: Some(cause),
                        computed_at: computed_at.clone(),
                    }
                }
            };

            self.db.set_run(&run).await?;
            report.rows.push(RunOutcome {
                academy_id,
                checkin_count: run.checkin_count,
                amount_cents: run.amount_cents,
                status: run.status,
                error: run.error,
            });
        }

        tracing::info!(
            period_id,
            computed = report.computed,
            failed = report.failed,
            skipped_paid = report.skipped_paid,
            total_cents = report.total_cents,
            "Settlement computation complete"
        );

        Ok(report)
    }
}
