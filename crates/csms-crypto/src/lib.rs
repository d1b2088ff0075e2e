//! # CSMS Crypto - Per-Peer Key State and Message Signing
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `symmetric` | XChaCha20-Poly1305 | Payload sealing with counter-derived nonces |
//! | `context` | - | Encryption Context Store keyed by (peer, key slot) |
//! | `signing` | Ed25519, ECDSA secp256k1 | Key ring behind the `MessageSigner` port |
//!
//! ## Security Properties
//!
//! - **Counter monotonicity**: every sealing for a (peer, slot) consumes a
//!   distinct counter value; the counter never resets while the context lives.
//! - **No key leakage**: `SecretKey` debug output is redacted; diagnostics use
//!   a SHA-256 fingerprint.
//! - **Zeroization**: secret bytes are wiped on drop.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod context;
pub mod errors;
pub mod signing;
pub mod symmetric;

// Re-exports
pub use context::{ContextKey, ContextMaterial, EncryptionContextStore};
pub use errors::CryptoError;
pub use signing::{
    verify_signature, Ed25519KeyPair, KeyRing, MessageSigner, Secp256k1KeyPair, SigningMaterial,
};
pub use symmetric::{open, seal, Direction, SecretKey, KEY_LEN};
