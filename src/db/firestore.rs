// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Members, plans, academies (entitlement reads)
//! - Check-in events (append-only ledger)
//! - Engagement aggregates (transactional updates)
//! - Payout periods, runs and transfers
//! - Notification delivery log and fraud findings

use crate::db::collections;
use crate::error::AppError;
use crate::models::badge::Badge;
use crate::models::{
    Academy, CheckinEvent, CheckinStatus, EngagementState, Member, NotificationLogEntry,
    PayoutPeriod, PayoutRun, PayoutTransfer, Plan,
};
use crate::time_utils::{day_key, format_utc_rfc3339};
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::{stream, StreamExt};

const MAX_CONCURRENT_DB_OPS: usize = 50;
const MAX_TX_ATTEMPTS: u32 = 3;

/// Cursor for forward pagination of a member's check-in history.
#[derive(Debug, Clone)]
pub struct CheckinQueryCursor {
    /// RFC3339 timestamp of the last event on the previous page
    pub timestamp: String,
    /// Event id tie-breaker
    pub checkin_id: String,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Member / Plan / Academy Operations ──────────────────────

    /// Get a member by id.
    pub async fn get_member(&self, member_id: u64) -> Result<Option<Member>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::MEMBERS)
            .obj()
            .one(&member_id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update a member.
    pub async fn upsert_member(&self, member: &Member) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::MEMBERS)
            .document_id(member.member_id.to_string())
            .object(member)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get a plan by id.
    pub async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::PLANS)
            .obj()
            .one(plan_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get an academy by id.
    pub async fn get_academy(&self, academy_id: u64) -> Result<Option<Academy>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACADEMIES)
            .obj()
            .one(&academy_id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update an academy (used by integration tests and seeding).
    pub async fn upsert_academy(&self, academy: &Academy) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::ACADEMIES)
            .document_id(academy.academy_id.to_string())
            .object(academy)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Create or update a plan (used by integration tests and seeding).
    pub async fn upsert_plan(&self, plan: &Plan) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PLANS)
            .document_id(plan.plan_id.clone())
            .object(plan)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Engagement Operations ───────────────────────────────────

    /// Get a member's engagement aggregate.
    pub async fn get_engagement(
        &self,
        member_id: u64,
    ) -> Result<Option<EngagementState>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ENGAGEMENT)
            .obj()
            .one(&member_id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store a member's engagement aggregate (used by recompute/backfill).
    pub async fn set_engagement(&self, state: &EngagementState) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::ENGAGEMENT)
            .document_id(state.member_id.to_string())
            .object(state)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Engagement aggregates whose last validated check-in was on `day`.
    /// Used by the streak-risk sweep.
    pub async fn list_engagement_by_last_day(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<EngagementState>, AppError> {
        let key = day_key(day);
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ENGAGEMENT)
            .filter(move |q| q.for_all([q.field("last_checkin_day").eq(key.clone())]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Check-in Operations ─────────────────────────────────────

    /// Store a check-in event outside a transaction.
    ///
    /// The admission path only uses this for rejected events (audit trail);
    /// validated events go through [`Self::admit_checkin_atomic`].
    pub async fn record_checkin(&self, event: &CheckinEvent) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::CHECKINS)
            .document_id(event.id.clone())
            .object(event)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Atomically admit a check-in: re-check the daily limit, append the
    /// validated event, update engagement and unlock badges in one Firestore
    /// transaction.
    ///
    /// The engagement read is issued under the transaction's consistency
    /// selector, so the member's aggregate is in the commit's read set and
    /// two concurrent attempts by the same member cannot both pass the limit
    /// check: the losing commit aborts and the retry re-runs the count
    /// against fresh data, surfacing [`AppError::DailyLimitExceeded`] once
    /// the limit is actually reached.
    ///
    /// Returns the stored event, the streak after this check-in and any newly
    /// unlocked badges.
    pub async fn admit_checkin_atomic(
        &self,
        member_id: u64,
        academy_id: u64,
        plan: &Plan,
        rate_cents: i64,
        now: DateTime<Utc>,
        day: NaiveDate,
    ) -> Result<(CheckinEvent, u32, Vec<Badge>), AppError> {
        let now_str = format_utc_rfc3339(now);
        let today = day_key(day);

        let mut last_err = None;
        for attempt in 1..=MAX_TX_ATTEMPTS {
            // Begin a transaction
            let mut transaction = self
                .get_client()?
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            // 1. Read current engagement state within the transaction. The
            //    read must go through a client carrying the transaction id as
            //    its consistency selector; a plain read would not join the
            //    read set and the commit would carry no conflict detection.
            let tx_client = self.get_client()?.clone_with_consistency_selector(
                firestore::FirestoreConsistencySelector::Transaction(
                    transaction.transaction_id().clone(),
                ),
            );
            let current: Option<EngagementState> = tx_client
                .fluent()
                .select()
                .by_id_in(collections::ENGAGEMENT)
                .obj()
                .one(&member_id.to_string())
                .await
                .map_err(|e| {
                    AppError::Database(format!("Failed to read engagement in transaction: {}", e))
                })?;

            let mut state = current.unwrap_or_else(|| EngagementState::new(member_id));

            // 2. Authoritative daily-limit check against transactional data
            let count_today = state.checkins_on(&today);
            if count_today >= plan.max_checkins_per_day {
                let _ = transaction.rollback().await;
                return Err(AppError::DailyLimitExceeded);
            }

            // 3. Build the event and update engagement in memory
            let seq = count_today + 1;
            let event = CheckinEvent {
                id: CheckinEvent::event_id(member_id, &today, seq),
                member_id,
                academy_id,
                plan_id: plan.plan_id.clone(),
                rate_cents,
                timestamp: now_str.clone(),
                day: today.clone(),
                status: CheckinStatus::Validated,
                rejection_reason: None,
            };

            state.record_checkin(day, &now_str);
            let new_badges = Badge::newly_unlocked(&state);
            for badge in &new_badges {
                state.unlock(*badge, &now_str);
            }

            // 4. Add event write to transaction
            self.get_client()?
                .fluent()
                .update()
                .in_col(collections::CHECKINS)
                .document_id(event.id.clone())
                .object(&event)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add check-in to transaction: {}", e))
                })?;

            // 5. Add engagement write to transaction
            self.get_client()?
                .fluent()
                .update()
                .in_col(collections::ENGAGEMENT)
                .document_id(member_id.to_string())
                .object(&state)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add engagement to transaction: {}", e))
                })?;

            // 6. Commit. A conflicting concurrent admission aborts the commit;
            //    the next attempt re-reads the engagement aggregate, so a
            //    member who lost the race to their own limit gets
            //    DailyLimitExceeded from the re-run of step 2.
            match transaction.commit().await {
                Ok(_) => {
                    tracing::info!(
                        member_id,
                        academy_id,
                        checkin_id = %event.id,
                        streak = state.current_streak,
                        new_badges = new_badges.len(),
                        "Check-in admitted atomically"
                    );
                    return Ok((event, state.current_streak, new_badges));
                }
                Err(e) => {
                    tracing::warn!(
                        member_id,
                        attempt,
                        error = %e,
                        "Check-in transaction contended, retrying"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(AppError::Database(format!(
            "Transaction commit failed after {} attempts: {}",
            MAX_TX_ATTEMPTS,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Get a member's check-in history with cursor pagination, newest first.
    pub async fn get_checkins_for_member(
        &self,
        member_id: u64,
        cursor: Option<CheckinQueryCursor>,
        limit: u32,
    ) -> Result<Vec<CheckinEvent>, AppError> {
        // Timestamps are second-granular, so the doc id is a tie-breaker in
        // both the ordering and the cursor; paging resumes after the exact
        // (timestamp, id) pair instead of skipping or repeating same-second
        // events.
        let query = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::CHECKINS)
            .filter(move |q| q.field("member_id").eq(member_id))
            .order_by([
                (
                    "timestamp",
                    firestore::FirestoreQueryDirection::Descending,
                ),
                ("id", firestore::FirestoreQueryDirection::Descending),
            ]);

        let query = if let Some(cursor) = cursor {
            query.start_at(firestore::FirestoreQueryCursor::AfterValue(vec![
                cursor.timestamp.into(),
                cursor.checkin_id.into(),
            ]))
        } else {
            query
        };

        query
            .limit(limit)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Full validated check-in history for one member (for recompute).
    pub async fn get_all_checkins_for_member(
        &self,
        member_id: u64,
    ) -> Result<Vec<CheckinEvent>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::CHECKINS)
            .filter(move |q| q.for_all([q.field("member_id").eq(member_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Validated check-ins whose day falls in `[start_day, end_day]`.
    /// Used by settlement and the fraud scan.
    pub async fn get_validated_checkins_between(
        &self,
        start_day: NaiveDate,
        end_day: NaiveDate,
    ) -> Result<Vec<CheckinEvent>, AppError> {
        let start = day_key(start_day);
        let end = day_key(end_day);
        self.get_client()?
            .fluent()
            .select()
            .from(collections::CHECKINS)
            .filter(move |q| {
                q.for_all([
                    q.field("status").eq("validated"),
                    q.field("day").greater_than_or_equal(start.clone()),
                    q.field("day").less_than_or_equal(end.clone()),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Payout Period / Run / Transfer Operations ───────────────

    /// Get a payout period by id.
    pub async fn get_period(&self, period_id: &str) -> Result<Option<PayoutPeriod>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::PAYOUT_PERIODS)
            .obj()
            .one(period_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update a payout period.
    pub async fn set_period(&self, period: &PayoutPeriod) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PAYOUT_PERIODS)
            .document_id(period.id.clone())
            .object(period)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get a payout run by id.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<PayoutRun>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::PAYOUT_RUNS)
            .obj()
            .one(run_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update a payout run row.
    pub async fn set_run(&self, run: &PayoutRun) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PAYOUT_RUNS)
            .document_id(run.id.clone())
            .object(run)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// All runs for a period.
    pub async fn list_runs_for_period(
        &self,
        period_id: &str,
    ) -> Result<Vec<PayoutRun>, AppError> {
        let period = period_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::PAYOUT_RUNS)
            .filter(move |q| q.for_all([q.field("period_id").eq(period.clone())]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a payout transfer by id (same id as its run).
    pub async fn get_transfer(&self, transfer_id: &str) -> Result<Option<PayoutTransfer>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::PAYOUT_TRANSFERS)
            .obj()
            .one(transfer_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update a payout transfer row.
    pub async fn set_transfer(&self, transfer: &PayoutTransfer) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PAYOUT_TRANSFERS)
            .document_id(transfer.id.clone())
            .object(transfer)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Notification Log Operations ─────────────────────────────

    /// Get a delivery log entry by dedup key.
    pub async fn get_notification(
        &self,
        dedup_key: &str,
    ) -> Result<Option<NotificationLogEntry>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::NOTIFICATIONS)
            .obj()
            .one(dedup_key)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update a delivery log entry.
    pub async fn set_notification(&self, entry: &NotificationLogEntry) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::NOTIFICATIONS)
            .document_id(entry.dedup_key.clone())
            .object(entry)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Fraud Findings ──────────────────────────────────────────

    /// Store a batch of advisory fraud findings.
    ///
    /// Uses concurrent writes with a limit to avoid overloading Firestore.
    /// Document id combines member, reason and day so a re-scan of the same
    /// window overwrites rather than duplicates.
    pub async fn save_fraud_findings(
        &self,
        findings: &[crate::services::fraud::FraudFinding],
    ) -> Result<(), AppError> {
        let client = self.get_client()?;

        stream::iter(findings.to_vec())
            .map(|finding| async move {
                let doc_id = format!("{}_{}_{}", finding.member_id, finding.reason, finding.day);

                let _: () = client
                    .fluent()
                    .update()
                    .in_col(collections::FRAUD_FINDINGS)
                    .document_id(&doc_id)
                    .object(&finding)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                Ok::<_, AppError>(())
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<(), AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<()>, AppError>>()?;

        Ok(())
    }
}
