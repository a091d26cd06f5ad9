// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Push notification dispatch with per-day deduplication.
//!
//! Every dispatch is keyed by (member, kind, local day): the notification log
//! entry doubles as the dedup record, so a member never receives the same
//! kind twice in one day even across process restarts. Non-critical kinds are
//! suppressed during quiet hours; check-in confirmations always go out.

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::{
    dedup_key, DeliveryStatus, EngagementState, Member, NotificationKind, NotificationLogEntry,
};
use crate::time_utils::{day_key, format_utc_rfc3339, local_hour};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// HTTP client for the push gateway. `new_mock` builds an offline client
/// whose sends succeed locally, with optional per-token failure injection.
pub struct PushClient {
    http: Option<reqwest::Client>,
    base_url: String,
    api_key: String,
    pushes_sent: AtomicU32,
    mock_failures: Mutex<HashSet<String>>,
}

#[derive(Serialize)]
struct PushPayload<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
}

impl PushClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: Some(reqwest::Client::new()),
            base_url,
            api_key,
            pushes_sent: AtomicU32::new(0),
            mock_failures: Mutex::new(HashSet::new()),
        }
    }

    pub fn new_mock() -> Self {
        Self {
            http: None,
            base_url: "http://push-gateway.invalid".to_string(),
            api_key: "mock".to_string(),
            pushes_sent: AtomicU32::new(0),
            mock_failures: Mutex::new(HashSet::new()),
        }
    }

    /// Make sends to this token fail (mock mode only).
    pub fn inject_failure(&self, push_token: &str) {
        self.mock_failures
            .lock()
            .unwrap()
            .insert(push_token.to_string());
    }

    pub fn pushes_sent(&self) -> u32 {
        self.pushes_sent.load(Ordering::SeqCst)
    }

    /// Deliver one push.
    pub async fn send_push(&self, push_token: &str, title: &str, body: &str) -> Result<()> {
        let Some(http) = &self.http else {
            if self.mock_failures.lock().unwrap().contains(push_token) {
                return Err(AppError::Gateway(
                    "push gateway rejected token (injected)".to_string(),
                ));
            }
            self.pushes_sent.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };

        let payload = PushPayload {
            to: push_token,
            title,
            body,
        };
        let response = http
            .post(format!("{}/v1/push", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("push request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "push gateway returned {}: {}",
                status, body
            )));
        }

        self.pushes_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What happened to one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    /// Already delivered (or in flight) for this member/kind/day
    Duplicate,
    /// Non-critical kind suppressed by quiet hours; no log written, so a
    /// later attempt the same day may still deliver
    QuietHours,
    Failed,
}

/// True when `hour` (local) falls inside the quiet window. The window may
/// wrap midnight, e.g. start 22 end 8.
pub fn in_quiet_hours(hour: u32, start: u32, end: u32) -> bool {
    if start == end {
        return false;
    }
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Result of one streak-risk sweep.
#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub day: String,
    pub candidates: u32,
    pub sent: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// Dispatches pushes through the gateway, deduplicated per local day.
#[derive(Clone)]
pub struct NotificationDispatcher {
    db: FirestoreDb,
    push: Arc<PushClient>,
    quiet_hours_start: u32,
    quiet_hours_end: u32,
    utc_offset_hours: i32,
}

/// Streak length below which a break is not worth a nudge.
const STREAK_RISK_THRESHOLD: u32 = 3;

impl NotificationDispatcher {
    pub fn new(
        db: FirestoreDb,
        push: Arc<PushClient>,
        quiet_hours_start: u32,
        quiet_hours_end: u32,
        utc_offset_hours: i32,
    ) -> Self {
        Self {
            db,
            push,
            quiet_hours_start,
            quiet_hours_end,
            utc_offset_hours,
        }
    }

    /// Dispatch one notification, at most once per (member, kind, local day).
    ///
    /// A previously failed delivery may be retried; a sent or pending entry
    /// is a duplicate and is skipped.
    pub async fn dispatch(
        &self,
        member: &Member,
        kind: NotificationKind,
        day: NaiveDate,
        title: &str,
        body: &str,
    ) -> Result<DispatchOutcome> {
        let key = dedup_key(member.member_id, kind, &day_key(day));

        if let Some(existing) = self.db.get_notification(&key).await? {
            if existing.status != DeliveryStatus::Failed {
                tracing::debug!(dedup_key = %key, "Notification already dispatched, skipping");
                return Ok(DispatchOutcome::Duplicate);
            }
        }

        if !kind.is_critical() {
            let hour = local_hour(Utc::now(), self.utc_offset_hours);
            if in_quiet_hours(hour, self.quiet_hours_start, self.quiet_hours_end) {
                tracing::debug!(
                    member_id = member.member_id,
                    kind = kind.id(),
                    hour,
                    "Suppressing non-critical notification during quiet hours"
                );
                return Ok(DispatchOutcome::QuietHours);
            }
        }

        let now = format_utc_rfc3339(Utc::now());
        let mut entry = NotificationLogEntry {
            dedup_key: key.clone(),
            member_id: member.member_id,
            kind,
            day: day_key(day),
            status: DeliveryStatus::Pending,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let Some(push_token) = member.push_token.as_deref() else {
            entry.status = DeliveryStatus::Failed;
            entry.error = Some("member has no push token".to_string());
            self.db.set_notification(&entry).await?;
            return Ok(DispatchOutcome::Failed);
        };

        // Claim the dedup key before the gateway call
        self.db.set_notification(&entry).await?;

        match self.push.send_push(push_token, title, body).await {
            Ok(()) => {
                entry.status = DeliveryStatus::Sent;
                entry.updated_at = format_utc_rfc3339(Utc::now());
                self.db.set_notification(&entry).await?;
                Ok(DispatchOutcome::Sent)
            }
            Err(e) => {
                let cause = e.to_string();
                tracing::warn!(
                    member_id = member.member_id,
                    kind = kind.id(),
                    error = %cause,
                    "Push delivery failed"
                );
                entry.status = DeliveryStatus::Failed;
                entry.error = Some(cause);
                entry.updated_at = format_utc_rfc3339(Utc::now());
                self.db.set_notification(&entry).await?;
                Ok(DispatchOutcome::Failed)
            }
        }
    }

    /// Nudge members whose streak breaks today unless they check in: last
    /// check-in was yesterday and the streak is long enough to matter.
    pub async fn streak_risk_sweep(&self, today: NaiveDate) -> Result<SweepReport> {
        let mut report = SweepReport {
            day: day_key(today),
            candidates: 0,
            sent: 0,
            skipped: 0,
            failed: 0,
        };

        let Some(yesterday) = today.pred_opt() else {
            return Ok(report);
        };

        let states: Vec<EngagementState> =
            self.db.list_engagement_by_last_day(yesterday).await?;

        for state in states {
            if state.current_streak < STREAK_RISK_THRESHOLD {
                continue;
            }
            report.candidates += 1;

            let member = match self.db.get_member(state.member_id).await? {
                Some(m) if m.membership_active => m,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            let body = format!(
                "Check in today to keep your {}-day streak alive",
                state.current_streak
            );
            let outcome = self
                .dispatch(
                    &member,
                    NotificationKind::StreakRisk,
                    today,
                    "Your streak is at risk",
                    &body,
                )
                .await?;

            match outcome {
                DispatchOutcome::Sent => report.sent += 1,
                DispatchOutcome::Failed => report.failed += 1,
                DispatchOutcome::Duplicate | DispatchOutcome::QuietHours => report.skipped += 1,
            }
        }

        tracing::info!(
            day = %report.day,
            candidates = report.candidates,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Streak-risk sweep complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_hours_wrap_midnight() {
        // 22:00 through 07:59
        assert!(in_quiet_hours(22, 22, 8));
        assert!(in_quiet_hours(23, 22, 8));
        assert!(in_quiet_hours(0, 22, 8));
        assert!(in_quiet_hours(7, 22, 8));
        assert!(!in_quiet_hours(8, 22, 8));
        assert!(!in_quiet_hours(12, 22, 8));
        assert!(!in_quiet_hours(21, 22, 8));
    }

    #[test]
    fn test_quiet_hours_same_day_window() {
        assert!(in_quiet_hours(13, 12, 14));
        assert!(!in_quiet_hours(14, 12, 14));
        assert!(!in_quiet_hours(11, 12, 14));
    }

    #[test]
    fn test_quiet_hours_empty_window() {
        assert!(!in_quiet_hours(10, 10, 10));
    }

    #[tokio::test]
    async fn test_mock_push_counts_sends() {
        let client = PushClient::new_mock();
        client.send_push("tok_1", "hi", "there").await.unwrap();
        client.send_push("tok_2", "hi", "there").await.unwrap();
        assert_eq!(client.pushes_sent(), 2);
    }

    #[tokio::test]
    async fn test_mock_push_failure_injection() {
        let client = PushClient::new_mock();
        client.inject_failure("tok_bad");
        assert!(client.send_push("tok_bad", "hi", "there").await.is_err());
        assert_eq!(client.pushes_sent(), 0);
    }
}
