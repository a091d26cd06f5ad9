// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Badge catalog and unlock evaluation.
//!
//! The catalog is a closed set of variants evaluated by one pure dispatcher.
//! Evaluation is deterministic and side-effect-free over an
//! [`EngagementState`] snapshot, which makes recomputation and backfill safe.

use serde::{Deserialize, Serialize};

use crate::models::EngagementState;
use crate::time_utils::parse_day_key;

/// Badge catalog. Shipped with the system, not user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    FirstCheckin,
    Streak3,
    Streak7,
    Streak30,
    Volume50,
    WeeklyRegular,
}

impl Badge {
    pub const ALL: [Badge; 6] = [
        Badge::FirstCheckin,
        Badge::Streak3,
        Badge::Streak7,
        Badge::Streak30,
        Badge::Volume50,
        Badge::WeeklyRegular,
    ];

    /// Stable id used in storage and API responses.
    pub fn id(self) -> &'static str {
        match self {
            Badge::FirstCheckin => "first_checkin",
            Badge::Streak3 => "streak_3",
            Badge::Streak7 => "streak_7",
            Badge::Streak30 => "streak_30",
            Badge::Volume50 => "volume_50",
            Badge::WeeklyRegular => "weekly_regular",
        }
    }

    /// Human-readable title for notifications and API responses.
    pub fn title(self) -> &'static str {
        match self {
            Badge::FirstCheckin => "First check-in",
            Badge::Streak3 => "3-day streak",
            Badge::Streak7 => "7-day streak",
            Badge::Streak30 => "30-day streak",
            Badge::Volume50 => "50 check-ins",
            Badge::WeeklyRegular => "3 check-ins in a week",
        }
    }

    /// Unlock predicate over an engagement snapshot.
    fn qualifies(self, state: &EngagementState) -> bool {
        match self {
            Badge::FirstCheckin => state.total_checkins >= 1,
            Badge::Streak3 => state.current_streak >= 3,
            Badge::Streak7 => state.current_streak >= 7,
            Badge::Streak30 => state.current_streak >= 30,
            Badge::Volume50 => state.total_checkins >= 50,
            Badge::WeeklyRegular => {
                // Trailing 7 days ending at the most recent check-in day
                state
                    .last_checkin_day
                    .as_deref()
                    .and_then(parse_day_key)
                    .is_some_and(|end| state.checkins_in_window(end, 7) >= 3)
            }
        }
    }

    /// Badges that qualify now and are not yet unlocked.
    ///
    /// Never returns already-unlocked badges, so a badge can only ever be
    /// granted once; evaluating twice on the same snapshot is a no-op.
    pub fn newly_unlocked(state: &EngagementState) -> Vec<Badge> {
        Badge::ALL
            .into_iter()
            .filter(|b| !state.has_badge(*b) && b.qualifies(state))
            .collect()
    }
}
