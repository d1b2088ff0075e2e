//! # Frame Model
//!
//! The unit a channel sends and receives. Three shapes exist on the wire:
//!
//! - `Call`: a request carrying an action name and payload
//! - `CallResult`: the successful reply, correlated by `request_id`
//! - `CallError`: a protocol-level failure reply, correlated by `request_id`
//!
//! ## Security
//!
//! - **Signing scope**: `Frame::signing_bytes` covers the request id, origin,
//!   destination and body. The timestamp and the signature block itself are
//!   excluded.
//! - **Sealed payloads**: an encrypted payload is the JSON object
//!   `{"sealed": {...}}`; see [`SealedPayload`].

use crate::errors::{CallErrorCode, FrameError};
use crate::ids::{PeerId, RequestId};
use crate::kind::MessageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a signing key held by a key ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRef(String);

impl KeyRef {
    /// Create a key reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The key name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmId {
    /// Ed25519 (RFC 8032).
    Ed25519,
    /// ECDSA over secp256k1 with SHA-256, 64-byte r||s encoding.
    EcdsaSecp256k1,
}

impl std::fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ed25519 => write!(f, "ed25519"),
            Self::EcdsaSecp256k1 => write!(f, "ecdsa-secp256k1"),
        }
    }
}

/// Detached signature attached to an outgoing frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    /// Key used to sign.
    pub key_ref: KeyRef,
    /// Algorithm used to sign.
    pub algorithm: AlgorithmId,
    /// Hex-encoded signature bytes.
    pub signature: String,
}

/// Body of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameBody {
    /// Request.
    Call {
        action: MessageKind,
        payload: serde_json::Value,
    },
    /// Successful reply. `action` is optional because most stations omit it.
    CallResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<MessageKind>,
        payload: serde_json::Value,
    },
    /// Protocol-level failure reply.
    CallError {
        code: CallErrorCode,
        description: String,
        #[serde(default)]
        details: serde_json::Value,
    },
}

/// A framed protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Correlation identifier.
    pub request_id: RequestId,
    /// Peer that produced the frame.
    pub origin: PeerId,
    /// Final addressee. A hub relays frames whose destination is not itself.
    pub destination: PeerId,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Optional detached signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
    /// Message body.
    pub body: FrameBody,
}

#[derive(Serialize)]
struct SigningView<'a> {
    request_id: &'a RequestId,
    origin: &'a PeerId,
    destination: &'a PeerId,
    body: &'a FrameBody,
}

impl Frame {
    /// Build a request frame.
    pub fn call(
        request_id: RequestId,
        origin: PeerId,
        destination: PeerId,
        action: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            request_id,
            origin,
            destination,
            timestamp: Utc::now(),
            signature: None,
            body: FrameBody::Call { action, payload },
        }
    }

    /// Build a successful reply to `request`.
    pub fn result_for(request: &Frame, payload: serde_json::Value) -> Self {
        Self {
            request_id: request.request_id.clone(),
            origin: request.destination.clone(),
            destination: request.origin.clone(),
            timestamp: Utc::now(),
            signature: None,
            body: FrameBody::CallResult {
                action: None,
                payload,
            },
        }
    }

    /// Build an error reply to `request`.
    pub fn error_for(
        request: &Frame,
        code: CallErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request.request_id.clone(),
            origin: request.destination.clone(),
            destination: request.origin.clone(),
            timestamp: Utc::now(),
            signature: None,
            body: FrameBody::CallError {
                code,
                description: description.into(),
                details: serde_json::Value::Null,
            },
        }
    }

    /// Action name, when the body carries one.
    pub fn action(&self) -> Option<&MessageKind> {
        match &self.body {
            FrameBody::Call { action, .. } => Some(action),
            FrameBody::CallResult { action, .. } => action.as_ref(),
            FrameBody::CallError { .. } => None,
        }
    }

    /// Whether this frame is a reply (result or error).
    pub fn is_reply(&self) -> bool {
        !matches!(self.body, FrameBody::Call { .. })
    }

    /// Canonical bytes covered by a signature.
    ///
    /// `serde_json` objects are ordered maps, so the output is stable for a
    /// given frame.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let view = SigningView {
            request_id: &self.request_id,
            origin: &self.origin,
            destination: &self.destination,
            body: &self.body,
        };
        serde_json::to_vec(&view).map_err(|e| FrameError::Encoding(e.to_string()))
    }
}

/// Encrypted payload produced with a peer's encryption context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// Key slot of the context used, if the peer has several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_slot: Option<u16>,
    /// Context nonce at sealing time.
    pub nonce: u64,
    /// Counter value consumed by this sealing.
    pub counter: u64,
    /// Hex-encoded AEAD ciphertext (tag included).
    pub ciphertext: String,
}

impl SealedPayload {
    const FIELD: &'static str = "sealed";

    /// Wrap into the `{"sealed": {...}}` payload form.
    pub fn to_value(&self) -> Result<serde_json::Value, FrameError> {
        let inner =
            serde_json::to_value(self).map_err(|e| FrameError::Encoding(e.to_string()))?;
        let mut map = serde_json::Map::new();
        map.insert(Self::FIELD.to_string(), inner);
        Ok(serde_json::Value::Object(map))
    }

    /// Recognise a sealed payload. Returns `Ok(None)` for plaintext payloads.
    pub fn from_value(value: &serde_json::Value) -> Result<Option<Self>, FrameError> {
        let Some(inner) = value.as_object().and_then(|m| m.get(Self::FIELD)) else {
            return Ok(None);
        };
        serde_json::from_value(inner.clone())
            .map(Some)
            .map_err(|e| FrameError::MalformedSealedPayload(e.to_string()))
    }

    /// Decode the ciphertext bytes.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, FrameError> {
        hex::decode(&self.ciphertext)
            .map_err(|e| FrameError::MalformedSealedPayload(e.to_string()))
    }
}
