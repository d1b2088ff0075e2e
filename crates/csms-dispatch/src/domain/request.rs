//! Typed request abstraction.
//!
//! Every protocol operation is a `CsmsRequest` implementation; the dispatch
//! core handles all of them through one generic path.

use chrono::{DateTime, Utc};
use csms_types::{MessageKind, PeerId, RequestId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// A request the CSMS can send to a station.
///
/// The serialized form of `Self` is the request payload. The destination is
/// not part of the payload.
pub trait CsmsRequest: Serialize + Send + Sync {
    /// Action name on the wire.
    const KIND: MessageKind;

    /// Payload type of the matching `CallResult`.
    type Response: DeserializeOwned + Send + 'static;

    /// Station the request is for.
    fn destination(&self) -> &PeerId;
}

/// Payload encryption for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Encryption {
    /// Key slot of the destination's encryption context.
    pub key_slot: Option<u16>,
}

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Use this id instead of generating one.
    pub request_id: Option<RequestId>,
    /// Deadline for the reply; the configured default otherwise.
    pub timeout: Option<Duration>,
    /// Seal the payload with the destination's encryption context.
    pub encrypt: Option<Encryption>,
    /// Frame timestamp; now otherwise.
    pub timestamp: Option<DateTime<Utc>>,
}

impl RequestOptions {
    #[must_use]
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn encrypted(mut self, key_slot: Option<u16>) -> Self {
        self.encrypt = Some(Encryption { key_slot });
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
