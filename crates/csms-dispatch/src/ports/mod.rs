//! # Ports Layer
//!
//! Driven ports the dispatch core requires from its environment:
//!
//! - [`Channel`]: a transport carrying frames to and from connected peers
//! - `MessageSigner` (from `csms-crypto`): produces detached signatures

pub mod channel;

pub use channel::{Channel, ChannelError, ChannelEvent, ChannelId};
