// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod academy;
pub mod badge;
pub mod checkin;
pub mod engagement;
pub mod member;
pub mod notification;
pub mod payout;

pub use academy::Academy;
pub use badge::Badge;
pub use checkin::{CheckinEvent, CheckinStatus};
pub use engagement::EngagementState;
pub use member::{Member, Plan, PlanKind};
pub use notification::{dedup_key, DeliveryStatus, NotificationKind, NotificationLogEntry};
pub use payout::{PayoutPeriod, PayoutRun, PayoutTransfer, PeriodStatus, RunStatus, TransferStatus};
