//! Database layer (Firestore).

pub mod firestore;

pub use firestore::FirestoreDb;

/// Collection names as constants.
pub mod collections {
    pub const MEMBERS: &str = "members";
    pub const PLANS: &str = "plans";
    pub const ACADEMIES: &str = "academies";
    /// Append-only check-in events (keyed by `{member}_{day}_{seq}`)
    pub const CHECKINS: &str = "checkins";
    /// Engagement aggregates (keyed by member_id)
    pub const ENGAGEMENT: &str = "engagement";
    pub const PAYOUT_PERIODS: &str = "payout_periods";
    /// Settlement rows (keyed by `{period}_{academy}`)
    pub const PAYOUT_RUNS: &str = "payout_runs";
    /// Money movements (keyed by run id)
    pub const PAYOUT_TRANSFERS: &str = "payout_transfers";
    /// Delivery log (keyed by dedup key)
    pub const NOTIFICATIONS: &str = "notifications";
    /// Advisory fraud findings for the moderation workflow
    pub const FRAUD_FINDINGS: &str = "fraud_findings";
}
