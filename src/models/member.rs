// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Member and plan models (the entitlement view).
//!
//! Members and plans are owned by the identity/billing collaborators; this
//! core only reads them. The one exception is membership deactivation driven
//! by the payment gateway cancellation webhook.

use serde::{Deserialize, Serialize};

/// Member profile record in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    /// Member ID (also used as document ID)
    pub member_id: u64,
    pub name: String,
    pub email: Option<String>,
    /// Current plan reference; `None` means no membership at all
    pub plan_id: Option<String>,
    /// Cleared when the payment gateway reports a cancellation
    pub membership_active: bool,
    /// Device token for push notifications
    pub push_token: Option<String>,
    /// Account creation timestamp (ISO 8601)
    pub created_at: String,
}

/// Plan kind. The catalog is closed; billing owns the pricing tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Solo,
    Family,
}

/// Membership plan record.
///
/// Rate fields are integer cents. Plans are immutable once referenced by a
/// check-in: admission snapshots the rate onto the event, so later plan edits
/// never change settled amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan ID (also used as document ID)
    pub plan_id: String,
    pub kind: PlanKind,
    pub max_checkins_per_day: u32,
    pub max_checkins_per_week: u32,
    /// Fee paid to the academy per validated check-in (cents)
    pub repasse_per_checkin_cents: i64,
    /// Floor for an academy's period total (cents)
    pub repasse_min_cents: i64,
    /// Ceiling for an academy's period total (cents)
    pub repasse_max_cents: i64,
    pub is_active: bool,
}

impl Plan {
    /// Plan used by tests: 1 check-in/day, 10 cents/check-in, clamps 50..500.
    #[cfg(test)]
    pub fn test_solo() -> Self {
        Self {
            plan_id: "solo-basic".to_string(),
            kind: PlanKind::Solo,
            max_checkins_per_day: 1,
            max_checkins_per_week: 7,
            repasse_per_checkin_cents: 10,
            repasse_min_cents: 50,
            repasse_max_cents: 500,
            is_active: true,
        }
    }
}
