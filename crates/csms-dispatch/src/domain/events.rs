//! Notifications published around each request.

use csms_bus::KindedEvent;
use csms_types::{CallErrorCode, MessageKind, PeerId, RequestId};

/// What a notification carries beyond the request identity.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
    /// Outgoing request payload (sealed form when encrypted).
    Request {
        payload: serde_json::Value,
        encrypted: bool,
        signed: bool,
    },
    /// Successful reply payload as received.
    Response { payload: serde_json::Value },
    /// Protocol error reply.
    Error {
        code: CallErrorCode,
        description: String,
    },
}

/// One before-send or after-receive notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub request_id: RequestId,
    /// Final addressee of the request.
    pub destination: PeerId,
    pub kind: MessageKind,
    pub detail: EventDetail,
}

impl KindedEvent for DispatchEvent {
    type Kind = MessageKind;

    fn kind(&self) -> &MessageKind {
        &self.kind
    }
}
