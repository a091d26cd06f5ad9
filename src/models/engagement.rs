// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Derived engagement state per member.
//!
//! This aggregate is updated atomically with check-in writes via Firestore
//! transactions. It is a cache over the append-only check-in history and can
//! be rebuilt from it at any time with [`EngagementState::recompute`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::models::badge::Badge;
use crate::models::CheckinEvent;
use crate::time_utils::{day_key, parse_day_key};

/// Derived engagement aggregate for a member.
///
/// Stored in the `engagement` collection, keyed by member_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementState {
    pub member_id: u64,

    // ─── Check-in History Index ──────────────────────────────────
    /// Validated check-in count per calendar day ("YYYY-MM-DD")
    #[serde(default)]
    pub checkins_by_day: HashMap<String, u32>,
    /// Most recent day with a validated check-in
    #[serde(default)]
    pub last_checkin_day: Option<String>,

    // ─── Streaks ─────────────────────────────────────────────────
    /// Consecutive-day run ending at the last check-in day
    #[serde(default)]
    pub current_streak: u32,
    /// High-water mark, never decreased
    #[serde(default)]
    pub longest_streak: u32,

    // ─── Totals ──────────────────────────────────────────────────
    /// Total validated check-ins
    #[serde(default)]
    pub total_checkins: u32,

    // ─── Badges ──────────────────────────────────────────────────
    /// Unlocked badge ids mapped to unlock timestamps (ISO 8601).
    /// A badge, once present here, is never re-evaluated or removed.
    #[serde(default)]
    pub badges: BTreeMap<String, String>,

    // ─── Metadata ────────────────────────────────────────────────
    /// Last update timestamp (ISO 8601)
    #[serde(default)]
    pub updated_at: String,
}

impl EngagementState {
    pub fn new(member_id: u64) -> Self {
        Self {
            member_id,
            checkins_by_day: HashMap::new(),
            last_checkin_day: None,
            current_streak: 0,
            longest_streak: 0,
            total_checkins: 0,
            badges: BTreeMap::new(),
            updated_at: String::new(),
        }
    }

    /// Validated check-ins recorded on a given day.
    pub fn checkins_on(&self, day: &str) -> u32 {
        self.checkins_by_day.get(day).copied().unwrap_or(0)
    }

    /// Validated check-ins in the trailing window of `days` calendar days
    /// ending at `end_day` (inclusive).
    pub fn checkins_in_window(&self, end_day: NaiveDate, days: u32) -> u32 {
        (0..days)
            .filter_map(|back| end_day.checked_sub_days(chrono::Days::new(u64::from(back))))
            .map(|d| self.checkins_on(&day_key(d)))
            .sum()
    }

    /// Record one validated check-in on `day`.
    ///
    /// Streak rule: a check-in on the day after the last one extends the run;
    /// a second check-in on the same day leaves it unchanged; any larger gap
    /// starts a new run of length 1. The longest streak only ever grows.
    pub fn record_checkin(&mut self, day: NaiveDate, now: &str) {
        let key = day_key(day);
        let last = self.last_checkin_day.as_deref().and_then(parse_day_key);

        match last {
            Some(prev) if day == prev => {}
            Some(prev) if prev.succ_opt() == Some(day) => self.current_streak += 1,
            _ => self.current_streak = 1,
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);

        *self.checkins_by_day.entry(key.clone()).or_insert(0) += 1;
        self.total_checkins += 1;
        self.last_checkin_day = Some(key);
        self.updated_at = now.to_string();
    }

    /// Mark a badge unlocked. No-op if already unlocked.
    pub fn unlock(&mut self, badge: Badge, now: &str) {
        self.badges
            .entry(badge.id().to_string())
            .or_insert_with(|| now.to_string());
    }

    pub fn has_badge(&self, badge: Badge) -> bool {
        self.badges.contains_key(badge.id())
    }

    /// Rebuild engagement state from the full validated check-in history.
    ///
    /// Events are replayed in timestamp order; badge unlocks are re-derived
    /// at each step with the event's timestamp, so the rebuild is
    /// deterministic for a given history.
    pub fn recompute(member_id: u64, events: &[CheckinEvent]) -> Self {
        let mut sorted: Vec<&CheckinEvent> =
            events.iter().filter(|e| e.is_validated()).collect();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let mut state = Self::new(member_id);
        for event in sorted {
            let Some(day) = parse_day_key(&event.day) else {
                tracing::warn!(event_id = %event.id, day = %event.day, "Skipping event with malformed day key");
                continue;
            };
            state.record_checkin(day, &event.timestamp);
            for badge in Badge::newly_unlocked(&state) {
                state.unlock(badge, &event.timestamp);
            }
        }
        state
    }
}
