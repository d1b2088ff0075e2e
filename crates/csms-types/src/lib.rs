//! # CSMS Types Crate
//!
//! Shared vocabulary for the dispatch core: peer and request identifiers,
//! message kinds, and the frame model exchanged with charging stations and
//! relay hubs.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type that crosses a crate boundary is
//!   defined here.
//! - **Encoding Agnostic**: frames carry `serde_json::Value` payloads; how a
//!   transport turns a frame into bytes is the transport's concern.
//! - **Final Addressee in the Frame**: `Frame::destination` always names the
//!   station the message is for, even when the frame travels through a hub.

pub mod errors;
pub mod frame;
pub mod ids;
pub mod kind;

pub use errors::*;
pub use frame::*;
pub use ids::*;
pub use kind::*;
