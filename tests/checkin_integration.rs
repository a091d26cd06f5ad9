// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Integration tests against the Firestore emulator.
//!
//! Run with: FIRESTORE_EMULATOR_HOST=localhost:8080 cargo test
//!
//! Each test seeds its own members/academies with unique ids so reruns
//! against a warm emulator do not interfere with each other.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use checkin_engine::error::AppError;
use checkin_engine::models::{
    Academy, Member, PayoutPeriod, PeriodStatus, Plan, PlanKind, RunStatus, TransferStatus,
};
use checkin_engine::services::notify::{DispatchOutcome, NotificationDispatcher};
use checkin_engine::services::{PaymentClient, SettlementComputer, TransferExecutor};
use checkin_engine::time_utils::local_day;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

mod common;

/// Unique id per test invocation (emulator state survives across runs).
fn unique_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
        % 1_000_000_000_000
}

fn solo_plan(plan_id: &str) -> Plan {
    Plan {
        plan_id: plan_id.to_string(),
        kind: PlanKind::Solo,
        max_checkins_per_day: 1,
        max_checkins_per_week: 7,
        repasse_per_checkin_cents: 10,
        repasse_min_cents: 50,
        repasse_max_cents: 500,
        is_active: true,
    }
}

fn member(member_id: u64, plan_id: &str) -> Member {
    Member {
        member_id,
        name: "Integration Member".to_string(),
        email: None,
        plan_id: Some(plan_id.to_string()),
        membership_active: true,
        push_token: Some(format!("tok_{}", member_id)),
        created_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn academy(academy_id: u64) -> Academy {
    Academy {
        academy_id,
        name: format!("Academy {}", academy_id),
        latitude: Some(-23.5614),
        longitude: Some(-46.6559),
        custom_repasse_cents: None,
        transfer_account: format!("acct_{}", academy_id),
    }
}

fn create_test_jwt(member_id: u64, signing_key: &[u8]) -> String {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        exp: usize,
        iat: usize,
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize;
    let claims = Claims {
        sub: member_id.to_string(),
        exp: now + 86400,
        iat: now,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .unwrap()
}

// ─── End-to-end Admission ────────────────────────────────────

#[tokio::test]
async fn test_checkin_end_to_end_299_meters() {
    require_emulator!();

    let (app, state) = common::create_emulator_app().await;
    let member_id = unique_id();
    let academy_id = unique_id() + 1;
    let plan_id = format!("solo-{}", member_id);

    state.db.upsert_plan(&solo_plan(&plan_id)).await.unwrap();
    state
        .db
        .upsert_member(&member(member_id, &plan_id))
        .await
        .unwrap();
    state.db.upsert_academy(&academy(academy_id)).await.unwrap();

    let token = create_test_jwt(member_id, &state.config.jwt_signing_key);

    // ~299 m north of the academy: inside the fence
    let lat = -23.5614 + 299.0 / 111_320.0;
    let body = format!(
        r#"{{"academy_id": {}, "latitude": {}, "longitude": -46.6559}}"#,
        academy_id, lat
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/checkins")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["current_streak"], 1);
    assert!(json["new_badges"]
        .as_array()
        .unwrap()
        .iter()
        .any(|b| b["id"] == "first_checkin"));

    // Second attempt the same day: daily limit
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/checkins")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_out_of_range_returns_distance() {
    require_emulator!();

    let (app, state) = common::create_emulator_app().await;
    let member_id = unique_id();
    let academy_id = unique_id() + 1;
    let plan_id = format!("solo-{}", member_id);

    state.db.upsert_plan(&solo_plan(&plan_id)).await.unwrap();
    state
        .db
        .upsert_member(&member(member_id, &plan_id))
        .await
        .unwrap();
    state.db.upsert_academy(&academy(academy_id)).await.unwrap();

    let token = create_test_jwt(member_id, &state.config.jwt_signing_key);

    // ~2 km away
    let lat = -23.5614 + 2_000.0 / 111_320.0;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/checkins")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(
                    r#"{{"academy_id": {}, "latitude": {}, "longitude": -46.6559}}"#,
                    academy_id, lat
                )))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let distance = json["distance_meters"].as_f64().unwrap();
    assert!((1_800.0..2_200.0).contains(&distance));
}

// ─── Concurrency ─────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_admission_yields_single_event() {
    require_emulator!();

    let db = common::test_db().await;
    let member_id = unique_id();
    let academy_id = unique_id() + 1;
    let plan = solo_plan(&format!("solo-{}", member_id));

    db.upsert_plan(&plan).await.unwrap();
    db.upsert_member(&member(member_id, &plan.plan_id))
        .await
        .unwrap();

    let now = chrono::Utc::now();
    let day = local_day(now, -3);

    let db_a = db.clone();
    let db_b = db.clone();
    let plan_a = plan.clone();
    let plan_b = plan.clone();
    let (res_a, res_b) = tokio::join!(
        tokio::spawn(async move {
            db_a.admit_checkin_atomic(member_id, academy_id, &plan_a, 10, now, day)
                .await
        }),
        tokio::spawn(async move {
            db_b.admit_checkin_atomic(member_id, academy_id, &plan_b, 10, now, day)
                .await
        }),
    );
    let results = [res_a.unwrap(), res_b.unwrap()];

    // Exactly one winner: the losing commit aborts, the retry re-reads the
    // aggregate and hits the solo plan's one-per-day limit.
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one admission must succeed");
    let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(losers.len(), 1);
    assert!(
        matches!(losers[0], AppError::DailyLimitExceeded),
        "loser must see the daily limit, got: {:?}",
        losers[0]
    );

    // Whatever the interleaving, the limit holds in the aggregate: one
    // validated event document, one counted check-in.
    let engagement = db.get_engagement(member_id).await.unwrap().unwrap();
    assert_eq!(engagement.total_checkins, 1);
    assert_eq!(engagement.current_streak, 1);
}

#[tokio::test]
async fn test_pagination_splits_same_second_events_exactly_once() {
    require_emulator!();

    let db = common::test_db().await;
    let member_id = unique_id();
    let academy_id = unique_id() + 1;

    // Three events sharing one second-granular timestamp; only the doc id
    // distinguishes them in the page ordering.
    for seq in 1..=3u32 {
        let event = checkin_engine::models::CheckinEvent {
            id: format!("{}_2024-07-01_{}", member_id, seq),
            member_id,
            academy_id,
            plan_id: "solo".to_string(),
            rate_cents: 10,
            timestamp: "2024-07-01T10:00:00Z".to_string(),
            day: "2024-07-01".to_string(),
            status: checkin_engine::models::CheckinStatus::Validated,
            rejection_reason: None,
        };
        db.record_checkin(&event).await.unwrap();
    }

    let first_page = db.get_checkins_for_member(member_id, None, 2).await.unwrap();
    assert_eq!(first_page.len(), 2);

    let last = first_page.last().unwrap();
    let cursor = checkin_engine::db::firestore::CheckinQueryCursor {
        timestamp: last.timestamp.clone(),
        checkin_id: last.id.clone(),
    };
    let second_page = db
        .get_checkins_for_member(member_id, Some(cursor), 2)
        .await
        .unwrap();
    assert_eq!(second_page.len(), 1);

    let mut seen: Vec<_> = first_page
        .iter()
        .chain(second_page.iter())
        .map(|e| e.id.clone())
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3, "pages must cover each event exactly once");
}

// ─── Settlement & Transfers ──────────────────────────────────

#[tokio::test]
async fn test_settlement_compute_execute_idempotent() {
    require_emulator!();

    let db = common::test_db().await;
    let member_id = unique_id();
    let academy_id = unique_id() + 1;
    let plan = solo_plan(&format!("solo-{}", member_id));
    let period_id = format!("p-{}", member_id);

    db.upsert_plan(&plan).await.unwrap();
    db.upsert_academy(&academy(academy_id)).await.unwrap();
    db.set_period(&PayoutPeriod {
        id: period_id.clone(),
        starts_on: "2024-06-01".to_string(),
        ends_on: "2024-06-30".to_string(),
        status: PeriodStatus::Open,
    })
    .await
    .unwrap();

    // Three validated check-ins inside the period, written directly
    for d in 1..=3u32 {
        let event = checkin_engine::models::CheckinEvent {
            id: format!("{}_2024-06-{:02}_1", member_id, d),
            member_id,
            academy_id,
            plan_id: plan.plan_id.clone(),
            rate_cents: 10,
            timestamp: format!("2024-06-{:02}T10:00:00Z", d),
            day: format!("2024-06-{:02}", d),
            status: checkin_engine::models::CheckinStatus::Validated,
            rejection_reason: None,
        };
        db.record_checkin(&event).await.unwrap();
    }

    let locks = Arc::new(dashmap::DashMap::new());
    let computer = SettlementComputer::new(db.clone(), locks, false);

    let first = computer.compute_period(&period_id).await.unwrap();
    let second = computer.compute_period(&period_id).await.unwrap();

    let row = |report: &checkin_engine::services::settlement::SettlementReport| {
        report
            .rows
            .iter()
            .find(|r| r.academy_id == academy_id)
            .map(|r| (r.checkin_count, r.amount_cents))
            .unwrap()
    };
    // raw 30, clamped up to the plan minimum of 50 - both times
    assert_eq!(row(&first), (3, 50));
    assert_eq!(row(&second), (3, 50));

    // Execute against the mock gateway
    let payments = Arc::new(PaymentClient::new_mock());
    let executor = TransferExecutor::new(db.clone(), payments.clone());
    executor.execute_period(&period_id, false).await.unwrap();

    let run_id = format!("{}_{}", period_id, academy_id);
    let run = db.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Paid);

    let transfer = db.get_transfer(&run_id).await.unwrap().unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
    assert_eq!(
        transfer.external_reference.as_deref(),
        Some(format!("mock_tr_{}", run_id).as_str())
    );

    // Re-execute: the paid run is skipped, no second gateway call
    let attempted_before = payments.transfers_attempted();
    executor.execute_period(&period_id, false).await.unwrap();
    assert_eq!(payments.transfers_attempted(), attempted_before);

    // Recompute after payment: the paid row is never overwritten
    let third = computer.compute_period(&period_id).await.unwrap();
    assert_eq!(third.skipped_paid, 1);
    let run = db.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Paid);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    require_emulator!();

    let db = common::test_db().await;
    let academy_id = unique_id() + 1;
    let period_id = format!("p-dry-{}", academy_id);

    db.upsert_academy(&academy(academy_id)).await.unwrap();
    db.set_period(&PayoutPeriod {
        id: period_id.clone(),
        starts_on: "2024-07-01".to_string(),
        ends_on: "2024-07-31".to_string(),
        status: PeriodStatus::Open,
    })
    .await
    .unwrap();

    // A draft run to be "executed"
    db.set_run(&checkin_engine::models::PayoutRun {
        id: format!("{}_{}", period_id, academy_id),
        period_id: period_id.clone(),
        academy_id,
        checkin_count: 5,
        amount_cents: 500,
        status: RunStatus::Draft,
        error: None,
        computed_at: "2024-08-01T00:00:00Z".to_string(),
    })
    .await
    .unwrap();

    let payments = Arc::new(PaymentClient::new_mock());
    let executor = TransferExecutor::new(db.clone(), payments.clone());
    let report = executor.execute_period(&period_id, true).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.transferred, 1);
    assert_eq!(report.total_cents, 500);
    assert_eq!(payments.transfers_attempted(), 0);

    // No transfer document, run still draft
    let run_id = format!("{}_{}", period_id, academy_id);
    assert!(db.get_transfer(&run_id).await.unwrap().is_none());
    let run = db.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Draft);
}

// ─── Notifications ───────────────────────────────────────────

#[tokio::test]
async fn test_notification_dedup_per_day() {
    require_emulator!();

    let db = common::test_db().await;
    let member_id = unique_id();
    let m = member(member_id, "solo-any");
    db.upsert_member(&m).await.unwrap();

    let push = Arc::new(checkin_engine::services::PushClient::new_mock());
    // Quiet hours disabled so the test is independent of wall-clock time
    let dispatcher = NotificationDispatcher::new(db.clone(), push.clone(), 0, 0, -3);

    let day = chrono::NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
    let first = dispatcher
        .dispatch(
            &m,
            checkin_engine::models::NotificationKind::CheckinConfirmation,
            day,
            "Check-in confirmed",
            "Check-in confirmed at Academy",
        )
        .await
        .unwrap();
    let second = dispatcher
        .dispatch(
            &m,
            checkin_engine::models::NotificationKind::CheckinConfirmation,
            day,
            "Check-in confirmed",
            "Check-in confirmed at Academy",
        )
        .await
        .unwrap();

    assert_eq!(first, DispatchOutcome::Sent);
    assert_eq!(second, DispatchOutcome::Duplicate);
    assert_eq!(push.pushes_sent(), 1);

    // A different kind the same day is not a duplicate
    let other = dispatcher
        .dispatch(
            &m,
            checkin_engine::models::NotificationKind::StreakRisk,
            day,
            "Your streak is at risk",
            "Check in today",
        )
        .await
        .unwrap();
    assert_eq!(other, DispatchOutcome::Sent);
    assert_eq!(push.pushes_sent(), 2);
}

// ─── Membership Webhook ──────────────────────────────────────

#[tokio::test]
async fn test_cancellation_deactivates_member() {
    require_emulator!();

    let (app, state) = common::create_emulator_app().await;
    let member_id = unique_id();
    let plan_id = format!("solo-{}", member_id);

    state.db.upsert_plan(&solo_plan(&plan_id)).await.unwrap();
    state
        .db
        .upsert_member(&member(member_id, &plan_id))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhook/payment/{}", state.config.webhook_path_uuid))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(
                    r#"{{"event_type": "subscription.cancelled", "member_id": {}}}"#,
                    member_id
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = state.db.get_member(member_id).await.unwrap().unwrap();
    assert!(!stored.membership_active);

    // Admission now fails with 403
    let token = create_test_jwt(member_id, &state.config.jwt_signing_key);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/checkins")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"academy_id": 1, "latitude": -23.5614, "longitude": -46.6559}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
