//! # CSMS Dispatch
//!
//! Message-dispatch core of a charging-station management server. Every
//! protocol operation goes through one generic primitive:
//!
//! ```text
//! Csms::dispatch(request) -> typed response | DispatchError
//! ```
//!
//! ## Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Identifier Generator | `domain::correlation` | Unique request ids (UUID v7) |
//! | Routing Table | `domain::routing` | Direct binding, else one-hop static route to a hub |
//! | Signature Policy | `domain::signing` | Ordered rules choosing key and algorithm |
//! | Correlator | `adapters::pending` | Pending requests, completion, expiry, cancellation |
//! | Channel Registry | `registry` | Channel lifecycle, peer bindings, drain on shutdown |
//! | Dispatch core | `service` | Owns all of the above plus the Event Notifier |
//! | Operations | `operations` | Typed adapters over `dispatch` |
//!
//! Encryption contexts and signing keys come from `csms-crypto`; the Event
//! Notifier from `csms-bus`.
//!
//! ## Architecture
//!
//! - **Hexagonal**: transports plug in through the [`Channel`] port; signing
//!   through `MessageSigner`.
//! - **Explicit state**: routes, keys and pending requests belong to one
//!   [`Csms`] value; separate instances share nothing.
//! - **Exactly-once completion**: each pending entry is completed by whichever
//!   of reply, error, timeout, cancellation or connection loss removes it first.

#![allow(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod domain;
pub mod operations;
pub mod ports;
pub mod registry;
pub mod service;

pub use adapters::{CancelHandle, Correlator, MemoryChannel, RemotePeer};
pub use domain::{
    ConfigError, CorrelationError, CsmsConfig, CsmsRequest, DispatchError, DispatchEvent,
    DispatchResult, Egress, EventDetail, MessageMatcher, RequestOptions, RoutingEntry,
    RoutingTable, SignaturePolicy, SignatureRule, SigningContext, UnsignedPolicy,
};
pub use ports::{Channel, ChannelError, ChannelEvent, ChannelId};
pub use registry::{ChannelRegistry, RegistryError, RegistryState, ShutdownReport};
pub use service::{Csms, CsmsBuilder, PendingCall};
