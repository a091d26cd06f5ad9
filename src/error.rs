// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("No active membership")]
    NoActiveMembership,

    #[error("Daily check-in limit reached")]
    DailyLimitExceeded,

    #[error("Reported position is {distance_meters:.0}m from the academy")]
    OutOfRange { distance_meters: f64 },

    #[error("Academy not found: {0}")]
    AcademyNotFound(String),

    #[error("Payout period {0} is not in a valid state for this operation")]
    InvalidPeriodState(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    /// Distance in meters, present only for out-of-range rejections so the
    /// client can render actionable feedback.
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_meters: Option<f64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details, distance) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None, None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None, None),
            AppError::NoActiveMembership => (
                StatusCode::FORBIDDEN,
                "no_active_membership",
                Some("No active membership plan for this member".to_string()),
                None,
            ),
            AppError::DailyLimitExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "daily_limit_exceeded",
                Some("Daily check-in limit reached for the current plan".to_string()),
                None,
            ),
            AppError::OutOfRange { distance_meters } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "out_of_range",
                Some(format!(
                    "You are {:.0}m away from the academy (max 300m)",
                    distance_meters
                )),
                Some(*distance_meters),
            ),
            AppError::AcademyNotFound(msg) => (
                StatusCode::NOT_FOUND,
                "academy_not_found",
                Some(msg.clone()),
                None,
            ),
            AppError::InvalidPeriodState(msg) => (
                StatusCode::CONFLICT,
                "invalid_period_state",
                Some(msg.clone()),
                None,
            ),
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "not_found", Some(msg.clone()), None)
            }
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                Some(msg.clone()),
                None,
            ),
            AppError::Gateway(msg) => {
                (StatusCode::BAD_GATEWAY, "gateway_error", Some(msg.clone()), None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None, None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None, None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
            distance_meters: distance,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
