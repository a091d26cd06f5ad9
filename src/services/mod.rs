// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod admission;
pub mod fraud;
pub mod geo;
pub mod notify;
pub mod settlement;
pub mod transfer;

pub use admission::{AdmissionController, AdmissionOutcome};
pub use fraud::FraudScanner;
pub use notify::{NotificationDispatcher, PushClient};
pub use settlement::SettlementComputer;
pub use transfer::{PaymentClient, TransferExecutor};
