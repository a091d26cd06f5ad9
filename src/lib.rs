// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Checkin-Engine: check-in admission and facility settlement
//!
//! This crate provides the backend API that admits member check-ins at
//! partner academies, maintains derived engagement state (streaks, badges)
//! and periodically settles per-check-in fees with the academies.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::notify::PushClient;
use services::transfer::PaymentClient;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub payments: Arc<PaymentClient>,
    pub push: Arc<PushClient>,
    /// Advisory locks preventing concurrent settlement of the same period
    /// within this process. Different periods may compute concurrently.
    pub settlement_locks: Arc<dashmap::DashMap<String, ()>>,
}
