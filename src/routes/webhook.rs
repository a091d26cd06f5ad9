// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for payment-gateway subscription events.
//!
//! Admission checks `membership_active` on every attempt, so flipping the
//! flag here is all it takes to stop (or resume) a member's check-ins.

use crate::AppState;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/payment/{uuid}", post(handle_event))
}

/// Payment gateway event payload.
#[derive(Deserialize, Debug)]
struct PaymentEvent {
    event_type: String,
    member_id: u64,
    /// Gateway's own event id, logged for traceability
    #[serde(default)]
    event_id: Option<String>,
}

/// Handle a payment gateway event (POST).
///
/// Always returns 200 for recognized paths so the gateway does not retry
/// events we have already acted on; unknown event types are logged and
/// acknowledged.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(event): Json<PaymentEvent>,
) -> impl IntoResponse {
    // Validate Path UUID
    if uuid != state.config.webhook_path_uuid {
        tracing::warn!(
            received_uuid = %uuid,
            "Security Alert: Webhook path UUID mismatch"
        );
        return StatusCode::NOT_FOUND;
    }

    tracing::info!(
        event_type = %event.event_type,
        member_id = event.member_id,
        event_id = ?event.event_id,
        "Payment webhook event received"
    );

    let active = match event.event_type.as_str() {
        "subscription.cancelled" | "subscription.expired" => false,
        "subscription.activated" | "subscription.renewed" => true,
        other => {
            tracing::debug!(event_type = %other, "Ignoring unhandled payment event type");
            return StatusCode::OK;
        }
    };

    match state.db.get_member(event.member_id).await {
        Ok(Some(mut member)) => {
            if member.membership_active != active {
                member.membership_active = active;
                if let Err(e) = state.db.upsert_member(&member).await {
                    tracing::error!(
                        member_id = event.member_id,
                        error = %e,
                        "Failed to update membership status"
                    );
                }
            }
        }
        Ok(None) => {
            tracing::warn!(
                member_id = event.member_id,
                "Payment event for unknown member"
            );
        }
        Err(e) => {
            tracing::error!(
                member_id = event.member_id,
                error = %e,
                "Failed to load member for payment event"
            );
        }
    }

    StatusCode::OK
}
