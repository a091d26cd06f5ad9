// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Transfer execution against the payment gateway.
//!
//! The gateway receives one transfer per payout run, keyed by the run id as
//! the idempotency key. The transfer record is persisted as `pending` before
//! the gateway call so a crash mid-flight leaves an auditable row; the
//! gateway's own idempotency handling makes the retry safe.

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::{
    PayoutRun, PayoutTransfer, PeriodStatus, RunStatus, TransferStatus,
};
use crate::time_utils::format_utc_rfc3339;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Request body for the gateway's transfer endpoint.
#[derive(Debug, Serialize)]
pub struct TransferRequest {
    pub idempotency_key: String,
    pub amount_cents: i64,
    pub destination_account: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct TransferCreated {
    id: String,
}

/// HTTP client for the payment gateway.
///
/// When constructed with `new_mock`, no HTTP client exists and transfers
/// succeed locally with a synthetic reference, unless a failure has been
/// injected for the idempotency key. Mirrors the offline mode of
/// [`FirestoreDb`](crate::db::FirestoreDb).
pub struct PaymentClient {
    http: Option<reqwest::Client>,
    base_url: String,
    api_key: String,
    transfers_attempted: AtomicU32,
    mock_failures: Mutex<HashSet<String>>,
}

impl PaymentClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: Some(reqwest::Client::new()),
            base_url,
            api_key,
            transfers_attempted: AtomicU32::new(0),
            mock_failures: Mutex::new(HashSet::new()),
        }
    }

    /// Offline client for tests: no network, deterministic references.
    pub fn new_mock() -> Self {
        Self {
            http: None,
            base_url: "http://payment-gateway.invalid".to_string(),
            api_key: "mock".to_string(),
            transfers_attempted: AtomicU32::new(0),
            mock_failures: Mutex::new(HashSet::new()),
        }
    }

    /// Make the next transfer with this idempotency key fail (mock mode only).
    pub fn inject_failure(&self, idempotency_key: &str) {
        self.mock_failures
            .lock()
            .unwrap()
            .insert(idempotency_key.to_string());
    }

    pub fn transfers_attempted(&self) -> u32 {
        self.transfers_attempted.load(Ordering::SeqCst)
    }

    /// Create a transfer at the gateway. Returns the gateway's reference id.
    pub async fn create_transfer(&self, request: &TransferRequest) -> Result<String> {
        self.transfers_attempted.fetch_add(1, Ordering::SeqCst);

        let Some(http) = &self.http else {
            // One-shot injected failures, so a retry succeeds
            let injected = self
                .mock_failures
                .lock()
                .unwrap()
                .remove(&request.idempotency_key);
            if injected {
                return Err(AppError::Gateway(
                    "gateway rejected transfer (injected)".to_string(),
                ));
            }
            return Ok(format!("mock_tr_{}", request.idempotency_key));
        };

        let response = http
            .post(format!("{}/v1/transfers", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("transfer request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "gateway returned {}: {}",
                status, body
            )));
        }

        let created: TransferCreated = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("malformed gateway response: {}", e)))?;
        Ok(created.id)
    }
}

/// Result of one execution pass over a period.
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub period_id: String,
    pub dry_run: bool,
    pub transferred: u32,
    pub failed: u32,
    pub skipped_paid: u32,
    pub total_cents: i64,
    pub rows: Vec<TransferOutcome>,
}

#[derive(Debug, Serialize)]
pub struct TransferOutcome {
    pub academy_id: u64,
    pub transfer_id: String,
    pub amount_cents: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Executes a period's draft payout runs as gateway transfers.
pub struct TransferExecutor {
    db: FirestoreDb,
    payments: Arc<PaymentClient>,
}

impl TransferExecutor {
    pub fn new(db: FirestoreDb, payments: Arc<PaymentClient>) -> Self {
        Self { db, payments }
    }

    /// Execute all draft runs for a period. With `dry_run` set, report what
    /// would be transferred without any writes or gateway calls.
    ///
    /// Paid runs are skipped, as are runs whose transfer already completed
    /// (the run is repaired to `paid` in that case). A gateway failure marks
    /// the transfer row `failed` but leaves the run draft, so a later pass
    /// retries it. One academy's failure never blocks its siblings.
    pub async fn execute_period(&self, period_id: &str, dry_run: bool) -> Result<ExecutionReport> {
        let period = self
            .db
            .get_period(period_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payout period {} not found", period_id)))?;

        if period.status != PeriodStatus::Open {
            return Err(AppError::InvalidPeriodState(format!(
                "period {} is closed",
                period_id
            )));
        }

        let runs = self.db.list_runs_for_period(period_id).await?;

        let mut report = ExecutionReport {
            period_id: period_id.to_string(),
            dry_run,
            transferred: 0,
            failed: 0,
            skipped_paid: 0,
            total_cents: 0,
            rows: Vec::new(),
        };

        for run in runs {
            match run.status {
                RunStatus::Paid => {
                    report.skipped_paid += 1;
                    continue;
                }
                RunStatus::Failed => {
                    // Computation failure: nothing to pay until recomputed
                    continue;
                }
                RunStatus::Draft => {}
            }

            if dry_run {
                report.transferred += 1;
                report.total_cents += run.amount_cents;
                report.rows.push(TransferOutcome {
                    academy_id: run.academy_id,
                    transfer_id: run.id.clone(),
                    amount_cents: run.amount_cents,
                    status: "would_transfer".to_string(),
                    external_reference: None,
                    error: None,
                });
                continue;
            }

            let outcome = self.execute_run(&run).await?;
            match outcome.status.as_str() {
                "completed" => {
                    report.transferred += 1;
                    report.total_cents += outcome.amount_cents;
                }
                "already_completed" => report.skipped_paid += 1,
                _ => report.failed += 1,
            }
            report.rows.push(outcome);
        }

        tracing::info!(
            period_id,
            dry_run,
            transferred = report.transferred,
            failed = report.failed,
            skipped_paid = report.skipped_paid,
            total_cents = report.total_cents,
            "Transfer execution complete"
        );

        Ok(report)
    }

    async fn execute_run(&self, run: &PayoutRun) -> Result<TransferOutcome> {
        let transfer_id = run.id.clone();
        let now = format_utc_rfc3339(Utc::now());

        // A completed transfer means the money already moved; repair the run
        // instead of paying twice.
        if let Some(existing) = self.db.get_transfer(&transfer_id).await? {
            if existing.status == TransferStatus::Completed {
                let mut paid = run.clone();
                paid.status = RunStatus::Paid;
                self.db.set_run(&paid).await?;
                return Ok(TransferOutcome {
                    academy_id: run.academy_id,
                    transfer_id,
                    amount_cents: run.amount_cents,
                    status: "already_completed".to_string(),
                    external_reference: existing.external_reference,
                    error: None,
                });
            }
        }

        let academy = self.db.get_academy(run.academy_id).await?;
        let Some(academy) = academy else {
            let transfer = PayoutTransfer {
                id: transfer_id.clone(),
                period_id: run.period_id.clone(),
                academy_id: run.academy_id,
                amount_cents: run.amount_cents,
                status: TransferStatus::Failed,
                external_reference: None,
                error: Some(format!("academy {} not found", run.academy_id)),
                created_at: now.clone(),
                updated_at: now,
            };
            self.db.set_transfer(&transfer).await?;
            return Ok(TransferOutcome {
                academy_id: run.academy_id,
                transfer_id,
                amount_cents: run.amount_cents,
                status: "failed".to_string(),
                external_reference: None,
                error: transfer.error,
            });
        };

        // Persist pending before calling out, so a crash leaves a trail
        let mut transfer = PayoutTransfer {
            id: transfer_id.clone(),
            period_id: run.period_id.clone(),
            academy_id: run.academy_id,
            amount_cents: run.amount_cents,
            status: TransferStatus::Pending,
            external_reference: None,
            error: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        self.db.set_transfer(&transfer).await?;

        let request = TransferRequest {
            idempotency_key: transfer_id.clone(),
            amount_cents: run.amount_cents,
            destination_account: academy.transfer_account.clone(),
            description: format!(
                "Check-in payout {} for {}",
                run.period_id, academy.name
            ),
        };

        match self.payments.create_transfer(&request).await {
            Ok(reference) => {
                transfer.status = TransferStatus::Completed;
                transfer.external_reference = Some(reference.clone());
                transfer.updated_at = format_utc_rfc3339(Utc::now());
                self.db.set_transfer(&transfer).await?;

                let mut paid = run.clone();
                paid.status = RunStatus::Paid;
                self.db.set_run(&paid).await?;

                Ok(TransferOutcome {
                    academy_id: run.academy_id,
                    transfer_id,
                    amount_cents: run.amount_cents,
                    status: "completed".to_string(),
                    external_reference: Some(reference),
                    error: None,
                })
            }
            Err(e) => {
                // Recorded on the row; siblings keep executing
                let cause = e.to_string();
                tracing::error!(
                    transfer_id = %transfer_id,
                    academy_id = run.academy_id,
                    error = %cause,
                    "Transfer failed at gateway"
                );
                transfer.status = TransferStatus::Failed;
                transfer.error = Some(cause.clone());
                transfer.updated_at = format_utc_rfc3339(Utc::now());
                self.db.set_transfer(&transfer).await?;

                Ok(TransferOutcome {
                    academy_id: run.academy_id,
                    transfer_id,
                    amount_cents: run.amount_cents,
                    status: "failed".to_string(),
                    external_reference: None,
                    error: Some(cause),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transfer_returns_deterministic_reference() {
        let client = PaymentClient::new_mock();
        let request = TransferRequest {
            idempotency_key: "2024-06_9".to_string(),
            amount_cents: 150,
            destination_account: "acct_9".to_string(),
            description: "Check-in payout 2024-06 for Academy 9".to_string(),
        };

        let reference = client.create_transfer(&request).await.unwrap();
        assert_eq!(reference, "mock_tr_2024-06_9");
        assert_eq!(client.transfers_attempted(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_clears_on_retry() {
        let client = PaymentClient::new_mock();
        client.inject_failure("2024-06_9");

        let request = TransferRequest {
            idempotency_key: "2024-06_9".to_string(),
            amount_cents: 150,
            destination_account: "acct_9".to_string(),
            description: "payout".to_string(),
        };

        assert!(client.create_transfer(&request).await.is_err());
        assert!(client.create_transfer(&request).await.is_ok());
        assert_eq!(client.transfers_attempted(), 2);
    }
}
