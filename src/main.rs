// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Checkin-Engine API Server
//!
//! Admits member check-ins at partner academies, maintains streak and badge
//! engagement state, and settles per-check-in fees with the academies.

use checkin_engine::{
    config::Config,
    db::FirestoreDb,
    services::{PaymentClient, PushClient},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Checkin-Engine API");

    // Initialize Firestore database
    let db = FirestoreDb::new(&config.gcp_project_id)
        .await
        .expect("Failed to connect to Firestore");

    // Gateway clients
    let payments = Arc::new(PaymentClient::new(
        config.payment_gateway_url.clone(),
        config.payment_api_key.clone(),
    ));
    let push = Arc::new(PushClient::new(
        config.push_gateway_url.clone(),
        config.push_api_key.clone(),
    ));
    tracing::info!("Gateway clients initialized");

    // Per-period settlement locks, shared across handlers in this instance
    let settlement_locks = Arc::new(dashmap::DashMap::new());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        payments,
        push,
        settlement_locks,
    });

    // Build router
    let app = checkin_engine::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("checkin_engine=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
