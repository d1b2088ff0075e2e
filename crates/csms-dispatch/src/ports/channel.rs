//! Channel port.
//!
//! A channel owns zero or more live peer connections over one transport. The
//! registry drives it through this trait and learns about connections and
//! inbound frames from the events it emits.

use async_trait::async_trait;
use csms_types::{Frame, PeerId};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Name of a channel, unique within a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a channel reports upward.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A peer connected (or reconnected) on this channel.
    Connected(PeerId),
    /// A peer's connection on this channel ended.
    Disconnected(PeerId),
    /// A frame arrived from a connected peer.
    Frame(PeerId, Frame),
}

/// Transport-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Peer {0} is not connected")]
    NotConnected(PeerId),

    #[error("Send to {peer} failed: {reason}")]
    SendFailed { peer: PeerId, reason: String },

    #[error("Channel {0} is closed")]
    Closed(ChannelId),

    #[error("Channel {0} has not been started")]
    NotStarted(ChannelId),

    #[error("Channel {0} was already started")]
    AlreadyStarted(ChannelId),

    #[error("Channel {0} is already registered")]
    DuplicateChannel(ChannelId),
}

/// Outbound port implemented by each transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name.
    fn id(&self) -> &ChannelId;

    /// Begin accepting/connecting; report activity on `events`.
    async fn start(&self, events: mpsc::Sender<ChannelEvent>) -> Result<(), ChannelError>;

    /// Transmit a frame to a peer connected on this channel.
    async fn send(&self, peer: &PeerId, frame: Frame) -> Result<(), ChannelError>;

    /// Refuse new connections; existing ones keep working.
    async fn stop_accepting(&self);

    /// Drop every connection and stop emitting events.
    async fn close(&self);
}
