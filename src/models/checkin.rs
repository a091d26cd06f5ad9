// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Check-in event model.
//!
//! Events are append-only and never mutated after creation. Validated events
//! are the sole input to both engagement state and settlement.

use serde::{Deserialize, Serialize};

/// Stored check-in event record in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinEvent {
    /// Document ID: `{member_id}_{day}_{seq}`. The per-day sequence makes the
    /// id unique per (member, day, attempt) and keeps a retried admission
    /// from ever producing two validated events.
    pub id: String,
    pub member_id: u64,
    pub academy_id: u64,
    /// Plan reference at admission time
    pub plan_id: String,
    /// Per-check-in rate snapshot at admission time (cents). Settlement uses
    /// this value, not the current plan rate.
    pub rate_cents: i64,
    /// Event timestamp (ISO 8601, UTC)
    pub timestamp: String,
    /// Calendar day in the platform reference timezone ("YYYY-MM-DD")
    pub day: String,
    pub status: CheckinStatus,
    /// Rejection reason code, set only on rejected events
    pub rejection_reason: Option<String>,
}

/// Check-in status. Rejected events are kept as an audit trail; only
/// validated events feed engagement and settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinStatus {
    Validated,
    Rejected,
}

impl CheckinEvent {
    pub fn event_id(member_id: u64, day: &str, seq: u32) -> String {
        format!("{}_{}_{}", member_id, day, seq)
    }

    pub fn is_validated(&self) -> bool {
        self.status == CheckinStatus::Validated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_format() {
        assert_eq!(
            CheckinEvent::event_id(42, "2024-06-10", 1),
            "42_2024-06-10_1"
        );
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&CheckinStatus::Validated).unwrap();
        assert_eq!(json, "\"validated\"");
        let json = serde_json::to_string(&CheckinStatus::Rejected).unwrap();
        assert_eq!(json, "\"rejected\"");
    }
}
