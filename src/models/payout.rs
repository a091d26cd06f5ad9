// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Payout period, run and transfer models.
//!
//! Amounts are integer cents so that recomputing a run from unchanged
//! check-in data yields byte-identical totals.

use serde::{Deserialize, Serialize};

/// Named settlement date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutPeriod {
    /// Period ID (also used as document ID), e.g. "2024-06"
    pub id: String,
    /// First day covered ("YYYY-MM-DD", inclusive)
    pub starts_on: String,
    /// Last day covered ("YYYY-MM-DD", inclusive)
    pub ends_on: String,
    pub status: PeriodStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Open,
    Closed,
}

/// One academy's computed settlement row for a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRun {
    /// Document ID: `{period_id}_{academy_id}`
    pub id: String,
    pub period_id: String,
    pub academy_id: u64,
    /// Validated check-ins aggregated into this row
    pub checkin_count: u32,
    /// Clamped amount owed to the academy (cents)
    pub amount_cents: i64,
    pub status: RunStatus,
    /// Per-row computation error; other academies are unaffected
    pub error: Option<String>,
    /// Last (re)computation timestamp (ISO 8601)
    pub computed_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Draft,
    Paid,
    Failed,
}

impl PayoutRun {
    pub fn run_id(period_id: &str, academy_id: u64) -> String {
        format!("{}_{}", period_id, academy_id)
    }
}

/// One attempted money movement for a run.
///
/// Keyed by the run id, so exactly one transfer row can ever exist per run;
/// re-running execution is idempotent by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutTransfer {
    /// Document ID: same as the parent run id
    pub id: String,
    pub period_id: String,
    pub academy_id: u64,
    pub amount_cents: i64,
    pub status: TransferStatus,
    /// Gateway transfer reference, set only once completed
    pub external_reference: Option<String>,
    /// Gateway error message, set only on failure
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_is_period_and_academy() {
        assert_eq!(PayoutRun::run_id("2024-06", 17), "2024-06_17");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Draft).unwrap(),
            "\"draft\""
        );
        assert_eq!(
            serde_json::to_string(&TransferStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&PeriodStatus::Open).unwrap(),
            "\"open\""
        );
    }
}
