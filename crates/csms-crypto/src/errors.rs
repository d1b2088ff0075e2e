//! Crypto error types.

use csms_types::{AlgorithmId, KeyRef, PeerId};
use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// No encryption context exists for the peer and key slot.
    #[error("No encryption context configured for peer {peer} (key slot {key_slot:?})")]
    KeyNotConfigured {
        /// Peer the context was requested for
        peer: PeerId,
        /// Requested key slot
        key_slot: Option<u16>,
    },

    /// No signing key is registered under this reference.
    #[error("Signing key {0} is not configured")]
    SigningKeyNotConfigured(KeyRef),

    /// The referenced key cannot produce the requested algorithm.
    #[error("Signing key {key_ref} does not support {algorithm}")]
    AlgorithmMismatch {
        /// Key that was selected
        key_ref: KeyRef,
        /// Algorithm that was requested
        algorithm: AlgorithmId,
    },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// An inbound counter did not advance past the last accepted one.
    #[error("Replay detected: counter {counter} is not above {last_accepted}")]
    ReplayDetected {
        /// Counter carried by the inbound payload
        counter: u64,
        /// Highest counter accepted so far
        last_accepted: u64,
    },

    /// The outbound counter or nonce reached `u64::MAX`.
    #[error("Counter exhausted for peer {0}; rekey required")]
    CounterExhausted(PeerId),

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Invalid private key
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Invalid public key
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Signature bytes have the wrong shape
    #[error("Invalid signature format")]
    InvalidSignatureFormat,

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,
}
