//! # Symmetric Encryption
//!
//! XChaCha20-Poly1305 sealing with deterministic nonces.
//!
//! ## Nonce Layout (24 bytes)
//!
//! | Bytes | Content |
//! |-------|---------|
//! | 0..8 | context nonce (big-endian) |
//! | 8..16 | counter (big-endian) |
//! | 16..18 | key slot, `0xFFFF` when absent (big-endian) |
//! | 18 | direction byte |
//! | 19..24 | zero |
//!
//! Uniqueness follows from the counter: the context store never hands out
//! the same counter twice for a (peer, slot, direction), so no (key, nonce)
//! pair repeats even when both directions share one key.

use crate::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

/// Secret key length in bytes.
pub const KEY_LEN: usize = 32;

const NO_SLOT: u16 = u16::MAX;

/// Secret key (256-bit).
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Generate random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short SHA-256 fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(<redacted> fp={})", self.fingerprint())
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        // Not constant time; keys are compared only in configuration paths.
        self.0 == other.0
    }
}

impl Eq for SecretKey {}

/// Which way a sealed payload travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sealed by the central system for a station.
    CentralToStation,
    /// Sealed by a station for the central system.
    StationToCentral,
}

impl Direction {
    /// The direction of replies to a payload travelling this way.
    pub fn reverse(self) -> Self {
        match self {
            Self::CentralToStation => Self::StationToCentral,
            Self::StationToCentral => Self::CentralToStation,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::CentralToStation => 0x01,
            Self::StationToCentral => 0x02,
        }
    }
}

fn derive_nonce(
    nonce: u64,
    counter: u64,
    key_slot: Option<u16>,
    direction: Direction,
) -> [u8; 24] {
    let mut bytes = [0u8; 24];
    bytes[..8].copy_from_slice(&nonce.to_be_bytes());
    bytes[8..16].copy_from_slice(&counter.to_be_bytes());
    bytes[16..18].copy_from_slice(&key_slot.unwrap_or(NO_SLOT).to_be_bytes());
    bytes[18] = direction.tag();
    bytes
}

/// Encrypt `plaintext` under `key`, binding `aad` into the tag.
///
/// `direction` selects a disjoint half of the nonce space, so the two ends
/// of a connection may share a key without ever reusing a nonce.
///
/// # Errors
///
/// Returns `CryptoError::EncryptionFailed` if encryption fails.
pub fn seal(
    key: &SecretKey,
    nonce: u64,
    counter: u64,
    key_slot: Option<u16>,
    direction: Direction,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce_bytes = derive_nonce(nonce, counter, key_slot, direction);

    cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Decrypt a ciphertext produced by [`seal`] with the same parameters,
/// including the same `direction`.
///
/// # Errors
///
/// Returns `CryptoError::DecryptionFailed` if the tag does not verify.
pub fn open(
    key: &SecretKey,
    nonce: u64,
    counter: u64,
    key_slot: Option<u16>,
    direction: Direction,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce_bytes = derive_nonce(nonce, counter, key_slot, direction);

    cipher
        .decrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}
