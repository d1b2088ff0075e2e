//! # CSMS Bus - Event Notifier
//!
//! Observability side channel of the dispatch core. Every request about to be
//! sent and every reply received is offered to subscribers registered for
//! that message kind.
//!
//! ```text
//!   dispatch path                     subscribers
//!   ─────────────                     ───────────
//!   fire(BeforeSend, e) ──┬──► handlers[(BeforeSend, kind)]
//!                         ├──► handlers[(BeforeSend, *)]
//!                         └──► audit stream (broadcast)
//! ```
//!
//! ## Guarantees
//!
//! - **Bounded delay**: `fire` returns within the configured budget no matter
//!   how slow the handlers are.
//! - **Isolation**: handler errors and panics are caught, logged and counted;
//!   they never reach the dispatch path.
//! - **Explicit subscriptions**: handlers are added and removed by
//!   [`SubscriptionId`].

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod notifier;
pub mod subscriber;

pub use events::{HandlerError, KindedEvent, Notification, Phase};
pub use notifier::{EventNotifier, FireReport, NotifierStats, SubscriptionId};
pub use subscriber::AuditStream;

/// Default time a notification may delay the dispatch path.
pub const DEFAULT_BUDGET_MS: u64 = 250;

/// Events buffered per audit stream before the slowest reader lags.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;
