// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Check-in admission service.
//!
//! Handles the core workflow:
//! 1. Resolve the member's active plan (entitlement)
//! 2. Check the daily rate limit
//! 3. Resolve the academy and check the geofence
//! 4. Append the validated event atomically (limit re-checked in the
//!    transaction), updating engagement and badges
//! 5. Fan out the confirmation notification (fire-and-forget)
//!
//! Validation short-circuits in that order; each failure maps to a distinct
//! error and leaves no validated writes behind. Rejections are recorded as
//! append-only audit events on a best-effort basis.

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::badge::Badge;
use crate::models::{Academy, CheckinEvent, CheckinStatus, Member, NotificationKind, Plan};
use crate::services::geo;
use crate::services::notify::NotificationDispatcher;
use crate::time_utils::{day_key, format_utc_rfc3339, local_day};
use chrono::Utc;

/// Orchestrates one check-in attempt.
pub struct AdmissionController {
    db: FirestoreDb,
    notifier: NotificationDispatcher,
    utc_offset_hours: i32,
}

/// Result of a successful admission.
#[derive(Debug)]
pub struct AdmissionOutcome {
    pub checkin: CheckinEvent,
    pub academy_name: String,
    pub current_streak: u32,
    pub new_badges: Vec<Badge>,
}

impl AdmissionController {
    pub fn new(
        db: FirestoreDb,
        notifier: NotificationDispatcher,
        utc_offset_hours: i32,
    ) -> Self {
        Self {
            db,
            notifier,
            utc_offset_hours,
        }
    }

    /// Admit or reject one check-in attempt.
    pub async fn admit(
        &self,
        member_id: u64,
        academy_id: u64,
        latitude: f64,
        longitude: f64,
    ) -> Result<AdmissionOutcome> {
        tracing::info!(member_id, academy_id, "Processing check-in attempt");

        let now = Utc::now();
        let day = local_day(now, self.utc_offset_hours);

        // 1. Entitlement
        let member = self.db.get_member(member_id).await?;
        let plan = match member.as_ref().and_then(|m| m.plan_id.as_deref()) {
            Some(plan_id) => self.db.get_plan(plan_id).await?,
            None => None,
        };
        let plan = check_entitlement(member.as_ref(), plan.as_ref())?.clone();

        // 2. Daily limit, fast path against the cached aggregate. The
        //    authoritative check runs again inside the admission transaction.
        let count_today = self
            .db
            .get_engagement(member_id)
            .await?
            .map(|s| s.checkins_on(&day_key(day)))
            .unwrap_or(0);
        if let Err(e) = check_daily_limit(count_today, &plan) {
            self.record_rejection(member_id, academy_id, &plan.plan_id, "daily_limit_exceeded")
                .await;
            return Err(e);
        }

        // 3. Academy lookup
        let academy = self
            .db
            .get_academy(academy_id)
            .await?
            .ok_or_else(|| AppError::AcademyNotFound(format!("Academy {} not found", academy_id)))?;

        // 4. Geofence
        let distance = match check_geofence(latitude, longitude, &academy) {
            Ok(d) => d,
            Err(e) => {
                self.record_rejection(member_id, academy_id, &plan.plan_id, "out_of_range")
                    .await;
                return Err(e);
            }
        };

        tracing::debug!(
            member_id,
            academy_id,
            distance_m = distance,
            "Geofence check passed"
        );

        // 5. Atomic admission: the plan rate is snapshotted onto the event so
        //    later plan edits never change settled amounts.
        let (checkin, current_streak, new_badges) = self
            .db
            .admit_checkin_atomic(
                member_id,
                academy_id,
                &plan,
                plan.repasse_per_checkin_cents,
                now,
                day,
            )
            .await?;

        // 6. Confirmation notification, fire-and-forget: a dispatch failure
        //    must never invalidate the check-in.
        if let Some(member) = member {
            let notifier = self.notifier.clone();
            let academy_name = academy.name.clone();
            tokio::spawn(async move {
                let body = format!("Check-in confirmed at {}", academy_name);
                if let Err(e) = notifier
                    .dispatch(
                        &member,
                        NotificationKind::CheckinConfirmation,
                        day,
                        "Check-in confirmed",
                        &body,
                    )
                    .await
                {
                    tracing::warn!(member_id = member.member_id, error = %e, "Confirmation dispatch failed");
                }
            });
        }

        Ok(AdmissionOutcome {
            checkin,
            academy_name: academy.name,
            current_streak,
            new_badges,
        })
    }

    /// Append a rejected event for auditing. Best-effort: a storage failure
    /// here only logs, the caller still returns the admission error.
    async fn record_rejection(
        &self,
        member_id: u64,
        academy_id: u64,
        plan_id: &str,
        reason: &str,
    ) {
        let now = Utc::now();
        let day = day_key(local_day(now, self.utc_offset_hours));
        let event = CheckinEvent {
            // Millisecond suffix keeps rejected ids from colliding with the
            // `{member}_{day}_{seq}` ids of validated events.
            id: format!("{}_{}_r{}", member_id, day, now.timestamp_millis()),
            member_id,
            academy_id,
            plan_id: plan_id.to_string(),
            rate_cents: 0,
            timestamp: format_utc_rfc3339(now),
            day,
            status: CheckinStatus::Rejected,
            rejection_reason: Some(reason.to_string()),
        };

        if let Err(e) = self.db.record_checkin(&event).await {
            tracing::warn!(member_id, error = %e, "Failed to record rejected check-in");
        }
    }
}

/// Entitlement check: the member must exist and hold an active plan.
pub fn check_entitlement<'a>(
    member: Option<&Member>,
    plan: Option<&'a Plan>,
) -> Result<&'a Plan> {
    let member = member.ok_or(AppError::NoActiveMembership)?;
    if member.plan_id.is_none() || !member.membership_active {
        return Err(AppError::NoActiveMembership);
    }
    match plan {
        Some(p) if p.is_active => Ok(p),
        _ => Err(AppError::NoActiveMembership),
    }
}

/// Daily rate-limit check against today's validated count.
pub fn check_daily_limit(count_today: u32, plan: &Plan) -> Result<()> {
    if count_today >= plan.max_checkins_per_day {
        Err(AppError::DailyLimitExceeded)
    } else {
        Ok(())
    }
}

/// Geofence check. Returns the computed distance on success; the distance is
/// also carried in the `OutOfRange` error for user feedback.
pub fn check_geofence(latitude: f64, longitude: f64, academy: &Academy) -> Result<f64> {
    let (academy_lat, academy_lon) = academy.coordinates().ok_or_else(|| {
        AppError::AcademyNotFound(format!(
            "Academy {} has no registered coordinates",
            academy.academy_id
        ))
    })?;

    let distance = geo::distance_meters(latitude, longitude, academy_lat, academy_lon);
    if geo::within_geofence(distance) {
        Ok(distance)
    } else {
        Err(AppError::OutOfRange {
            distance_meters: distance,
        })
    }
}
