//! # Error Types
//!
//! Protocol error codes carried in `CallError` frames and frame-level errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code of a `CallError` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallErrorCode {
    /// Requested action is not known by the receiver.
    NotImplemented,
    /// Requested action is recognised but not supported.
    NotSupported,
    /// Internal error prevented the receiver from processing the action.
    InternalError,
    /// Payload is incomplete.
    ProtocolError,
    /// Security issue prevented successful completion.
    SecurityError,
    /// Payload is syntactically incorrect.
    FormationViolation,
    /// Payload is syntactically correct but a field contains a wrong value.
    PropertyConstraintViolation,
    /// Payload violates occurrence constraints.
    OccurrenceConstraintViolation,
    /// Payload field has the wrong data type.
    TypeConstraintViolation,
    /// Any other error.
    GenericError,
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Errors building or interpreting frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// A frame or payload could not be serialized.
    #[error("Frame encoding failed: {0}")]
    Encoding(String),

    /// A `{"sealed": ...}` payload had the wrong shape.
    #[error("Malformed sealed payload: {0}")]
    MalformedSealedPayload(String),
}
