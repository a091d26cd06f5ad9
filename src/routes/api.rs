// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated members.

use crate::db::firestore::CheckinQueryCursor;
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::Badge;
use crate::services::notify::NotificationDispatcher;
use crate::services::AdmissionController;
use crate::time_utils::{day_key, local_day};
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/checkins", post(create_checkin).get(get_checkins))
        .route("/api/engagement", get(get_engagement))
}

// ─── Check-in Admission ──────────────────────────────────────

#[derive(Deserialize, Validate)]
pub struct CheckinRequest {
    pub academy_id: u64,
    #[validate(range(min = -90.0, max = 90.0, message = "latitude out of range"))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "longitude out of range"))]
    pub longitude: f64,
}

#[derive(Serialize)]
pub struct BadgeInfo {
    pub id: String,
    pub title: String,
}

impl From<Badge> for BadgeInfo {
    fn from(badge: Badge) -> Self {
        Self {
            id: badge.id().to_string(),
            title: badge.title().to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct CheckinResponse {
    pub checkin_id: String,
    pub academy_name: String,
    pub timestamp: String,
    pub current_streak: u32,
    pub new_badges: Vec<BadgeInfo>,
}

/// Admit a check-in at an academy.
async fn create_checkin(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CheckinRequest>,
) -> Result<(StatusCode, Json<CheckinResponse>)> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    tracing::info!(
        member_id = user.member_id,
        academy_id = payload.academy_id,
        "Check-in attempt"
    );

    let notifier = NotificationDispatcher::new(
        state.db.clone(),
        state.push.clone(),
        state.config.quiet_hours_start,
        state.config.quiet_hours_end,
        state.config.platform_utc_offset_hours,
    );
    let controller = AdmissionController::new(
        state.db.clone(),
        notifier,
        state.config.platform_utc_offset_hours,
    );

    let outcome = controller
        .admit(
            user.member_id,
            payload.academy_id,
            payload.latitude,
            payload.longitude,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckinResponse {
            checkin_id: outcome.checkin.id,
            academy_name: outcome.academy_name,
            timestamp: outcome.checkin.timestamp,
            current_streak: outcome.current_streak,
            new_badges: outcome.new_badges.into_iter().map(BadgeInfo::from).collect(),
        }),
    ))
}

// ─── Check-in History ────────────────────────────────────────

#[derive(Deserialize)]
struct CheckinsQuery {
    /// Cursor for forward pagination (opaque token).
    cursor: Option<String>,
    /// Pagination: items per page
    #[serde(default = "default_per_page")]
    per_page: u32,
}

fn default_per_page() -> u32 {
    50
}

const MAX_PER_PAGE: u32 = 100;
const CURSOR_PARTS: usize = 2;

fn parse_cursor(cursor: Option<&str>) -> Result<Option<CheckinQueryCursor>> {
    cursor
        .map(|raw| {
            let invalid_cursor =
                || AppError::BadRequest("Invalid 'cursor' parameter".to_string());

            let decoded = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid_cursor())?;
            let decoded_str = std::str::from_utf8(&decoded).map_err(|_| invalid_cursor())?;

            let parts: Vec<&str> = decoded_str.split('|').collect();
            if parts.len() != CURSOR_PARTS {
                return Err(invalid_cursor());
            }

            Ok(CheckinQueryCursor {
                timestamp: parts[0].to_string(),
                checkin_id: parts[1].to_string(),
            })
        })
        .transpose()
}

fn encode_cursor(cursor: CheckinQueryCursor) -> String {
    let payload = format!("{}|{}", cursor.timestamp, cursor.checkin_id);
    URL_SAFE_NO_PAD.encode(payload)
}

#[derive(Serialize)]
pub struct CheckinSummary {
    pub id: String,
    pub academy_id: u64,
    pub timestamp: String,
    pub day: String,
}

#[derive(Serialize)]
pub struct CheckinsResponse {
    pub checkins: Vec<CheckinSummary>,
    pub per_page: u32,
    pub next_cursor: Option<String>,
}

/// Get the member's validated check-ins, newest first.
async fn get_checkins(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<CheckinsQuery>,
) -> Result<Json<CheckinsResponse>> {
    tracing::debug!(
        member_id = user.member_id,
        cursor = ?params.cursor,
        "Fetching check-ins"
    );

    let limit = params.per_page.min(MAX_PER_PAGE);
    let cursor = parse_cursor(params.cursor.as_deref())?;

    // Fetch one extra item to determine if another page is available.
    let fetch_limit = limit.saturating_add(1);
    let mut results = state
        .db
        .get_checkins_for_member(user.member_id, cursor, fetch_limit)
        .await?;

    let has_more = results.len() > limit as usize;
    if has_more {
        results.truncate(limit as usize);
    }

    let next_cursor = if has_more {
        results.last().map(|last| {
            encode_cursor(CheckinQueryCursor {
                timestamp: last.timestamp.clone(),
                checkin_id: last.id.clone(),
            })
        })
    } else {
        None
    };

    let checkins = results
        .into_iter()
        .map(|e| CheckinSummary {
            id: e.id,
            academy_id: e.academy_id,
            timestamp: e.timestamp,
            day: e.day,
        })
        .collect();

    Ok(Json(CheckinsResponse {
        checkins,
        per_page: limit,
        next_cursor,
    }))
}

// ─── Engagement ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct UnlockedBadge {
    pub id: String,
    pub unlocked_at: String,
}

#[derive(Serialize)]
pub struct EngagementResponse {
    pub member_id: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_checkins: u32,
    pub checkins_today: u32,
    pub badges: Vec<UnlockedBadge>,
}

/// Get the member's engagement state (streaks, badges, today's count).
async fn get_engagement(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<EngagementResponse>> {
    let today = day_key(local_day(
        chrono::Utc::now(),
        state.config.platform_utc_offset_hours,
    ));

    // A member with no check-ins yet has no engagement document
    let state_doc = state.db.get_engagement(user.member_id).await?;

    let response = match state_doc {
        Some(engagement) => EngagementResponse {
            member_id: engagement.member_id,
            current_streak: engagement.current_streak,
            longest_streak: engagement.longest_streak,
            total_checkins: engagement.total_checkins,
            checkins_today: engagement.checkins_on(&today),
            badges: engagement
                .badges
                .iter()
                .map(|(id, unlocked_at)| UnlockedBadge {
                    id: id.clone(),
                    unlocked_at: unlocked_at.clone(),
                })
                .collect(),
        },
        None => EngagementResponse {
            member_id: user.member_id,
            current_streak: 0,
            longest_streak: 0,
            total_checkins: 0,
            checkins_today: 0,
            badges: vec![],
        },
    };

    Ok(Json(response))
}
