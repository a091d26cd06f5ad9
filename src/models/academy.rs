// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Partner academy (facility) model.

use serde::{Deserialize, Serialize};

/// Partner academy record in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Academy {
    /// Academy ID (also used as document ID)
    pub academy_id: u64,
    pub name: String,
    /// Registered coordinates; check-ins are rejected while unset
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Per-check-in rate override (cents). When set it replaces the plan
    /// rate for every check-in at this academy.
    pub custom_repasse_cents: Option<i64>,
    /// Destination account at the payment gateway
    pub transfer_account: String,
}

impl Academy {
    /// Registered coordinates as (latitude, longitude), if both are set.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}
