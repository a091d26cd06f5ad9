// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Notification log model and dedup keys.
//!
//! The log entry is written before the push gateway is called; its dedup key
//! is what makes retried dispatches safe.

use serde::{Deserialize, Serialize};

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CheckinConfirmation,
    StreakRisk,
}

impl NotificationKind {
    pub fn id(self) -> &'static str {
        match self {
            NotificationKind::CheckinConfirmation => "checkin_confirmation",
            NotificationKind::StreakRisk => "streak_risk",
        }
    }

    /// Critical notifications bypass the quiet-hours window.
    pub fn is_critical(self) -> bool {
        match self {
            NotificationKind::CheckinConfirmation => true,
            NotificationKind::StreakRisk => false,
        }
    }
}

/// Dedup key: one per (member, kind, calendar day).
pub fn dedup_key(member_id: u64, kind: NotificationKind, day: &str) -> String {
    format!("{}_{}_{}", member_id, kind.id(), day)
}

/// Delivery log record in Firestore, keyed by dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    /// Document ID (the dedup key)
    pub dedup_key: String,
    pub member_id: u64,
    pub kind: NotificationKind,
    /// Calendar day component of the dedup key ("YYYY-MM-DD")
    pub day: String,
    pub status: DeliveryStatus,
    /// Gateway error message, set only on failure
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_shape() {
        assert_eq!(
            dedup_key(42, NotificationKind::CheckinConfirmation, "2024-06-10"),
            "42_checkin_confirmation_2024-06-10"
        );
        assert_eq!(
            dedup_key(42, NotificationKind::StreakRisk, "2024-06-10"),
            "42_streak_risk_2024-06-10"
        );
    }

    #[test]
    fn test_same_inputs_same_key() {
        let a = dedup_key(7, NotificationKind::StreakRisk, "2024-01-01");
        let b = dedup_key(7, NotificationKind::StreakRisk, "2024-01-01");
        assert_eq!(a, b);
    }

    #[test]
    fn test_criticality() {
        assert!(NotificationKind::CheckinConfirmation.is_critical());
        assert!(!NotificationKind::StreakRisk.is_critical());
    }
}
