//! # Notification Types

use chrono::{DateTime, Utc};
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

/// Point in the request lifecycle a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// A request is about to be handed to a channel.
    BeforeSend,
    /// A reply has been matched to its request.
    AfterReceive,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeSend => write!(f, "before_send"),
            Self::AfterReceive => write!(f, "after_receive"),
        }
    }
}

/// An event that can be routed by kind.
pub trait KindedEvent: Clone + Send + Sync + 'static {
    /// Kind used to index subscribers.
    type Kind: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;

    /// Kind of this event.
    fn kind(&self) -> &Self::Kind;
}

/// An event as seen on the audit stream.
#[derive(Debug, Clone)]
pub struct Notification<E> {
    /// Lifecycle phase.
    pub phase: Phase,
    /// When the notification was fired.
    pub fired_at: DateTime<Utc>,
    /// The event itself.
    pub event: E,
}

/// Failure reported by a handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Create a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
