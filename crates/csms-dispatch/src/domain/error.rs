//! Dispatch error types.
//!
//! `DispatchError` is what a caller sees on a per-request awaitable.
//! `CorrelationError` is only ever logged by the inbound loop.

use crate::ports::channel::ChannelError;
use csms_crypto::CryptoError;
use csms_types::{CallErrorCode, FrameError, MessageKind, PeerId, RequestId};
use thiserror::Error;

/// Failure of a single dispatched request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    /// Neither a direct channel nor a static route reaches the destination.
    #[error("No route found to {destination}")]
    NoRouteFound { destination: PeerId },

    /// The deadline elapsed with no matching reply.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        request_id: RequestId,
        timeout_ms: u64,
    },

    /// The egress peer has no live connection, or lost it mid-request.
    #[error("Channel unavailable for {peer}: {reason}")]
    ChannelUnavailable { peer: PeerId, reason: String },

    /// Encryption context or signing key missing.
    #[error("Key not configured: {0}")]
    KeyNotConfigured(String),

    /// No signature rule matched and unsigned dispatch is rejected.
    #[error("Signature policy violation: {kind} to {destination} requires a signature")]
    SignaturePolicyViolation {
        kind: MessageKind,
        destination: PeerId,
    },

    /// The caller cancelled the request.
    #[error("Request {request_id} cancelled")]
    Cancelled { request_id: RequestId },

    /// The peer answered with a protocol error frame.
    #[error("Peer returned {code}: {description}")]
    CallError {
        code: CallErrorCode,
        description: String,
        details: serde_json::Value,
    },

    /// The reply names a different action than the request.
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: MessageKind,
        actual: MessageKind,
    },

    /// Reply payload did not decode into the response type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request payload could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Sealing, opening or signing failed.
    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    /// A caller-supplied request id is already in flight.
    #[error("Request id {0} is already in flight")]
    DuplicateRequestId(RequestId),

    /// The dispatch core is shutting down.
    #[error("Dispatch core is shutting down")]
    ShuttingDown,
}

impl From<CryptoError> for DispatchError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyNotConfigured { peer, key_slot } => {
                Self::KeyNotConfigured(format!("encryption context for {peer} (slot {key_slot:?})"))
            }
            CryptoError::SigningKeyNotConfigured(key_ref) => {
                Self::KeyNotConfigured(format!("signing key {key_ref}"))
            }
            other => Self::Crypto(other),
        }
    }
}

impl From<ChannelError> for DispatchError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::NotConnected(peer) => Self::ChannelUnavailable {
                peer,
                reason: "not connected".into(),
            },
            ChannelError::SendFailed { peer, reason } => Self::ChannelUnavailable { peer, reason },
            ChannelError::Closed(channel) => Self::ChannelUnavailable {
                peer: PeerId::new(channel.as_str()),
                reason: "channel closed".into(),
            },
            ChannelError::NotStarted(channel)
            | ChannelError::AlreadyStarted(channel)
            | ChannelError::DuplicateChannel(channel) => {
                Self::ChannelUnavailable {
                    peer: PeerId::new(channel.as_str()),
                    reason: format!("channel {channel} is not running"),
                }
            }
        }
    }
}

impl From<FrameError> for DispatchError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Encoding(msg) => Self::Encode(msg),
            FrameError::MalformedSealedPayload(msg) => Self::Decode(msg),
        }
    }
}

/// Why a completion was not delivered. Reported, never propagated to waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// The id completed recently; this is a second or late completion.
    #[error("Duplicate completion for request {0}")]
    DuplicateCompletion(RequestId),

    /// The id is not pending and was not completed recently.
    #[error("No pending request {0}")]
    UnknownRequest(RequestId),

    /// A peer other than the one the request left through answered it.
    #[error("Request {request_id} was sent via {expected}, not {actual}")]
    WrongPeer {
        request_id: RequestId,
        expected: PeerId,
        actual: PeerId,
    },
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
