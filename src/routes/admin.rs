// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Internal routes for the settlement scheduler and admin tooling.
//!
//! These endpoints are called by the platform scheduler, not directly by
//! members. They are guarded by a shared-secret header; the secret only
//! travels inside the deployment's private network.

use crate::error::{AppError, Result};
use crate::models::{EngagementState, PeriodStatus, RunStatus};
use crate::services::notify::NotificationDispatcher;
use crate::services::{FraudScanner, SettlementComputer, TransferExecutor};
use crate::time_utils::{local_day, parse_day_key};
use crate::AppState;
use axum::{
    extract::{Path, Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Internal routes (shared-secret header, applied in routes/mod.rs).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/internal/periods/{period_id}/compute", post(compute_period))
        .route("/internal/periods/{period_id}/execute", post(execute_period))
        .route("/internal/periods/{period_id}/close", post(close_period))
        .route("/internal/fraud/scan", post(fraud_scan))
        .route(
            "/internal/notifications/streak-risk",
            post(streak_risk_sweep),
        )
        .route(
            "/internal/members/{member_id}/recompute-engagement",
            post(recompute_engagement),
        )
}

/// Reject requests without the internal shared secret.
pub async fn require_internal_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("x-internal-token")
        .and_then(|h| h.to_str().ok());

    if presented != Some(state.config.internal_api_token.as_str()) {
        tracing::warn!(
            path = %request.uri().path(),
            "Security Alert: Blocked internal route access with bad token"
        );
        return AppError::Unauthorized.into_response();
    }

    next.run(request).await
}

// ─── Settlement ──────────────────────────────────────────────

/// Compute payout runs for a period.
async fn compute_period(
    State(state): State<Arc<AppState>>,
    Path(period_id): Path<String>,
) -> Result<Json<crate::services::settlement::SettlementReport>> {
    tracing::info!(period_id = %period_id, "Settlement computation requested");

    let computer = SettlementComputer::new(
        state.db.clone(),
        state.settlement_locks.clone(),
        state.config.custom_rate_respects_clamps,
    );
    let report = computer.compute_period(&period_id).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ExecuteParams {
    #[serde(default)]
    dry_run: bool,
}

/// Execute a period's draft runs as gateway transfers.
async fn execute_period(
    State(state): State<Arc<AppState>>,
    Path(period_id): Path<String>,
    Query(params): Query<ExecuteParams>,
) -> Result<Json<crate::services::transfer::ExecutionReport>> {
    tracing::info!(
        period_id = %period_id,
        dry_run = params.dry_run,
        "Transfer execution requested"
    );

    let executor = TransferExecutor::new(state.db.clone(), state.payments.clone());
    let report = executor.execute_period(&period_id, params.dry_run).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
pub struct ClosePeriodResponse {
    pub period_id: String,
    pub unpaid_runs: u32,
}

/// Close a period. Closing prevents further computation and execution; runs
/// still draft are reported so the operator can decide whether to reopen.
async fn close_period(
    State(state): State<Arc<AppState>>,
    Path(period_id): Path<String>,
) -> Result<Json<ClosePeriodResponse>> {
    let mut period = state
        .db
        .get_period(&period_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payout period {} not found", period_id)))?;

    if period.status == PeriodStatus::Closed {
        return Err(AppError::InvalidPeriodState(format!(
            "period {} is already closed",
            period_id
        )));
    }

    let runs = state.db.list_runs_for_period(&period_id).await?;
    let unpaid_runs = runs
        .iter()
        .filter(|r| r.status == RunStatus::Draft)
        .count() as u32;
    if unpaid_runs > 0 {
        tracing::warn!(
            period_id = %period_id,
            unpaid_runs,
            "Closing period with unpaid draft runs"
        );
    }

    period.status = PeriodStatus::Closed;
    state.db.set_period(&period).await?;

    tracing::info!(period_id = %period_id, "Period closed");
    Ok(Json(ClosePeriodResponse {
        period_id,
        unpaid_runs,
    }))
}

// ─── Fraud ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct FraudScanParams {
    /// Window end day ("YYYY-MM-DD"), defaults to the current local day
    day: Option<String>,
}

/// Scan the trailing week of validated check-ins for fraud signals.
async fn fraud_scan(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FraudScanParams>,
) -> Result<Json<crate::services::fraud::FraudReport>> {
    let window_end = match params.day.as_deref() {
        Some(raw) => parse_day_key(raw)
            .ok_or_else(|| AppError::BadRequest("Invalid 'day' parameter".to_string()))?,
        None => local_day(chrono::Utc::now(), state.config.platform_utc_offset_hours),
    };

    tracing::info!(window_end = %window_end, "Fraud scan requested");

    let scanner = FraudScanner::new(state.db.clone());
    let report = scanner.scan(window_end).await?;
    Ok(Json(report))
}

// ─── Notifications ───────────────────────────────────────────

/// Nudge members whose streak is about to break.
async fn streak_risk_sweep(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::services::notify::SweepReport>> {
    let today = local_day(chrono::Utc::now(), state.config.platform_utc_offset_hours);

    let dispatcher = NotificationDispatcher::new(
        state.db.clone(),
        state.push.clone(),
        state.config.quiet_hours_start,
        state.config.quiet_hours_end,
        state.config.platform_utc_offset_hours,
    );
    let report = dispatcher.streak_risk_sweep(today).await?;
    Ok(Json(report))
}

// ─── Engagement Repair ───────────────────────────────────────

#[derive(Serialize)]
pub struct RecomputeResponse {
    pub member_id: u64,
    pub total_checkins: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub badges: u32,
}

/// Rebuild a member's engagement document from their check-in events. The
/// event log is the source of truth; this repairs drift from partial writes.
async fn recompute_engagement(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<u64>,
) -> Result<Json<RecomputeResponse>> {
    tracing::info!(member_id, "Engagement recompute requested");

    let events = state.db.get_all_checkins_for_member(member_id).await?;
    let engagement = EngagementState::recompute(member_id, &events);
    state.db.set_engagement(&engagement).await?;

    Ok(Json(RecomputeResponse {
        member_id,
        total_checkins: engagement.total_checkins,
        current_streak: engagement.current_streak,
        longest_streak: engagement.longest_streak,
        badges: engagement.badges.len() as u32,
    }))
}
