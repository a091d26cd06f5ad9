// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fraud heuristics: batch scan over the validated check-in ledger.
//!
//! Findings are advisory records for the external moderation workflow. The
//! scan never blocks admission and never mutates check-in events.

use crate::db::FirestoreDb;
use crate::error::Result;
use crate::models::CheckinEvent;
use crate::time_utils::{day_key, format_utc_rfc3339};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// More than this many distinct academies in one calendar day is flagged.
pub const MAX_DISTINCT_ACADEMIES_PER_DAY: usize = 3;
/// More than this many validated check-ins in a trailing 7-day window is flagged.
pub const MAX_CHECKINS_PER_WEEK: usize = 20;

/// Advisory finding persisted for manual review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudFinding {
    pub member_id: u64,
    /// Reason code: "academy_diversity" or "weekly_volume"
    pub reason: String,
    pub detail: String,
    /// Day the finding is anchored to ("YYYY-MM-DD"): the offending day for
    /// diversity, the window end for volume
    pub day: String,
    pub detected_at: String,
}

/// Scan report returned to the operator.
#[derive(Debug, Serialize)]
pub struct FraudReport {
    pub window_start: String,
    pub window_end: String,
    pub scanned_events: u32,
    pub findings: Vec<FraudFinding>,
}

/// Pure scan over validated events in the trailing 7-day window ending at
/// `window_end` (inclusive). Events outside the window are ignored.
pub fn scan_events(events: &[CheckinEvent], window_end: NaiveDate) -> Vec<FraudFinding> {
    let window_start = window_end
        .checked_sub_days(Days::new(6))
        .unwrap_or(window_end);
    let start_key = day_key(window_start);
    let end_key = day_key(window_end);
    let detected_at = format_utc_rfc3339(Utc::now());

    // member -> day -> distinct academies, and member -> weekly total
    let mut by_member_day: HashMap<u64, HashMap<&str, HashSet<u64>>> = HashMap::new();
    let mut weekly_counts: HashMap<u64, usize> = HashMap::new();

    for event in events {
        if !event.is_validated() || event.day < start_key || event.day > end_key {
            continue;
        }
        by_member_day
            .entry(event.member_id)
            .or_default()
            .entry(event.day.as_str())
            .or_default()
            .insert(event.academy_id);
        *weekly_counts.entry(event.member_id).or_insert(0) += 1;
    }

    let mut findings = Vec::new();

    for (member_id, days) in &by_member_day {
        for (day, academies) in days {
            if academies.len() > MAX_DISTINCT_ACADEMIES_PER_DAY {
                findings.push(FraudFinding {
                    member_id: *member_id,
                    reason: "academy_diversity".to_string(),
                    detail: format!(
                        "{} distinct academies on {} (max {})",
                        academies.len(),
                        day,
                        MAX_DISTINCT_ACADEMIES_PER_DAY
                    ),
                    day: (*day).to_string(),
                    detected_at: detected_at.clone(),
                });
            }
        }
    }

    for (member_id, count) in &weekly_counts {
        if *count > MAX_CHECKINS_PER_WEEK {
            findings.push(FraudFinding {
                member_id: *member_id,
                reason: "weekly_volume".to_string(),
                detail: format!(
                    "{} validated check-ins between {} and {} (max {})",
                    count, start_key, end_key, MAX_CHECKINS_PER_WEEK
                ),
                day: end_key.clone(),
                detected_at: detected_at.clone(),
            });
        }
    }

    // Stable ordering for reports and idempotent re-scans
    findings.sort_by(|a, b| {
        a.member_id
            .cmp(&b.member_id)
            .then_with(|| a.reason.cmp(&b.reason))
            .then_with(|| a.day.cmp(&b.day))
    });
    findings
}

/// Batch scanner over the ledger.
pub struct FraudScanner {
    db: FirestoreDb,
}

impl FraudScanner {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Scan the trailing 7-day window ending at `window_end` and persist the
    /// findings for the moderation workflow.
    pub async fn scan(&self, window_end: NaiveDate) -> Result<FraudReport> {
        let window_start = window_end
            .checked_sub_days(Days::new(6))
            .unwrap_or(window_end);

        let events = self
            .db
            .get_validated_checkins_between(window_start, window_end)
            .await?;
        let findings = scan_events(&events, window_end);

        if !findings.is_empty() {
            self.db.save_fraud_findings(&findings).await?;
        }

        tracing::info!(
            window_start = %day_key(window_start),
            window_end = %day_key(window_end),
            scanned = events.len(),
            findings = findings.len(),
            "Fraud scan complete"
        );

        Ok(FraudReport {
            window_start: day_key(window_start),
            window_end: day_key(window_end),
            scanned_events: events.len() as u32,
            findings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckinStatus;

    fn event(member_id: u64, academy_id: u64, day: &str, seq: u32) -> CheckinEvent {
        CheckinEvent {
            id: CheckinEvent::event_id(member_id, day, seq),
            member_id,
            academy_id,
            plan_id: "solo-basic".to_string(),
            rate_cents: 10,
            timestamp: format!("{}T10:00:{:02}Z", day, seq % 60),
            day: day.to_string(),
            status: CheckinStatus::Validated,
            rejection_reason: None,
        }
    }

    fn end_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 7).unwrap()
    }

    #[test]
    fn test_three_academies_in_a_day_is_not_flagged() {
        let events: Vec<_> = (1..=3)
            .map(|a| event(1, a, "2024-01-05", a as u32))
            .collect();
        assert!(scan_events(&events, end_day()).is_empty());
    }

    #[test]
    fn test_four_academies_in_a_day_is_flagged() {
        let events: Vec<_> = (1..=4)
            .map(|a| event(1, a, "2024-01-05", a as u32))
            .collect();
        let findings = scan_events(&events, end_day());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].reason, "academy_diversity");
        assert_eq!(findings[0].member_id, 1);
        assert_eq!(findings[0].day, "2024-01-05");
    }

    #[test]
    fn test_weekly_volume_threshold() {
        // 21 check-ins across the window, 3 per day at the same academy
        let mut events = Vec::new();
        for d in 1..=7 {
            for seq in 1..=3 {
                events.push(event(2, 9, &format!("2024-01-{:02}", d), seq));
            }
        }
        let findings = scan_events(&events, end_day());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].reason, "weekly_volume");
        assert_eq!(findings[0].day, "2024-01-07");
    }

    #[test]
    fn test_events_outside_window_ignored() {
        // 25 check-ins but all before the window start
        let events: Vec<_> = (1..=25)
            .map(|seq| event(3, 9, "2023-12-20", seq))
            .collect();
        assert!(scan_events(&events, end_day()).is_empty());
    }

    #[test]
    fn test_rejected_events_ignored() {
        let mut events: Vec<_> = (1..=4).map(|a| event(4, a, "2024-01-05", a as u32)).collect();
        for e in &mut events {
            e.status = CheckinStatus::Rejected;
        }
        assert!(scan_events(&events, end_day()).is_empty());
    }

    #[test]
    fn test_findings_sorted_and_deterministic() {
        let mut events = Vec::new();
        for a in 1..=4 {
            events.push(event(5, a, "2024-01-05", a as u32));
        }
        for d in 1..=7 {
            for seq in 1..=3 {
                events.push(event(2, 9, &format!("2024-01-{:02}", d), seq));
            }
        }
        let findings = scan_events(&events, end_day());
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].member_id, 2);
        assert_eq!(findings[1].member_id, 5);
    }
}
