//! # Message Signing
//!
//! Key ring behind the [`MessageSigner`] port. The dispatch core asks for a
//! signature by key reference and algorithm; it never touches key bytes.
//!
//! ## Algorithms
//!
//! - **Ed25519**: deterministic, 64-byte signatures, 32-byte public keys
//! - **ECDSA secp256k1**: RFC 6979 nonces, 64-byte r||s signatures,
//!   33-byte compressed public keys

use crate::CryptoError;
use csms_types::{AlgorithmId, KeyRef};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Ed25519 keypair. The secret scalar is wiped on drop by `ed25519-dalek`.
pub struct Ed25519KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Ed25519KeyPair {
    /// Generate random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// Create from secret seed (32 bytes).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&seed),
        }
    }

    /// Public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        use ed25519_dalek::Signer;
        self.signing_key.sign(message).to_bytes()
    }
}

/// secp256k1 ECDSA keypair.
pub struct Secp256k1KeyPair {
    signing_key: k256::ecdsa::SigningKey,
}

impl Secp256k1KeyPair {
    /// Generate random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: k256::ecdsa::SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key = k256::ecdsa::SigningKey::from_bytes((&bytes).into())
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Compressed SEC1 public key (33 bytes).
    pub fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_sec1_bytes().to_vec()
    }

    /// Sign a message (SHA-256 digest, deterministic nonce).
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        use k256::ecdsa::signature::Signer;
        let sig: k256::ecdsa::Signature = self.signing_key.sign(message);
        sig.to_bytes().into()
    }
}

/// A signing key of either supported algorithm.
pub enum SigningMaterial {
    /// Ed25519 key.
    Ed25519(Ed25519KeyPair),
    /// secp256k1 key.
    Secp256k1(Secp256k1KeyPair),
}

impl SigningMaterial {
    /// Algorithm this key signs with.
    pub fn algorithm(&self) -> AlgorithmId {
        match self {
            Self::Ed25519(_) => AlgorithmId::Ed25519,
            Self::Secp256k1(_) => AlgorithmId::EcdsaSecp256k1,
        }
    }

    /// Public key bytes.
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            Self::Ed25519(k) => k.public_key().to_vec(),
            Self::Secp256k1(k) => k.public_key(),
        }
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Ed25519(k) => k.sign(message).to_vec(),
            Self::Secp256k1(k) => k.sign(message).to_vec(),
        }
    }
}

impl fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("algorithm", &self.algorithm())
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

/// Port through which outgoing frames are signed.
pub trait MessageSigner: Send + Sync {
    /// Sign `message` with the key registered as `key_ref`.
    ///
    /// # Errors
    ///
    /// - `SigningKeyNotConfigured` if no key is registered under `key_ref`
    /// - `AlgorithmMismatch` if the key cannot produce `algorithm`
    fn sign(
        &self,
        key_ref: &KeyRef,
        algorithm: AlgorithmId,
        message: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

/// In-memory key ring.
#[derive(Default)]
pub struct KeyRing {
    keys: DashMap<KeyRef, Arc<SigningMaterial>>,
}

impl KeyRing {
    /// Create an empty key ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a key.
    pub fn insert(&self, key_ref: KeyRef, material: SigningMaterial) {
        debug!(key_ref = %key_ref, algorithm = %material.algorithm(), "Signing key registered");
        self.keys.insert(key_ref, Arc::new(material));
    }

    /// Remove a key. Returns whether it existed.
    pub fn remove(&self, key_ref: &KeyRef) -> bool {
        self.keys.remove(key_ref).is_some()
    }

    /// Whether a key is registered.
    pub fn contains(&self, key_ref: &KeyRef) -> bool {
        self.keys.contains_key(key_ref)
    }

    /// Algorithm and public key of a registered key.
    pub fn public_key(&self, key_ref: &KeyRef) -> Result<(AlgorithmId, Vec<u8>), CryptoError> {
        let material = self.material(key_ref)?;
        Ok((material.algorithm(), material.public_key()))
    }

    fn material(&self, key_ref: &KeyRef) -> Result<Arc<SigningMaterial>, CryptoError> {
        self.keys
            .get(key_ref)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CryptoError::SigningKeyNotConfigured(key_ref.clone()))
    }
}

impl MessageSigner for KeyRing {
    fn sign(
        &self,
        key_ref: &KeyRef,
        algorithm: AlgorithmId,
        message: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let material = self.material(key_ref)?;
        if material.algorithm() != algorithm {
            return Err(CryptoError::AlgorithmMismatch {
                key_ref: key_ref.clone(),
                algorithm,
            });
        }
        Ok(material.sign(message))
    }
}

/// Verify a detached signature against a raw public key.
pub fn verify_signature(
    algorithm: AlgorithmId,
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    match algorithm {
        AlgorithmId::Ed25519 => {
            use ed25519_dalek::Verifier;
            let bytes: [u8; 32] = public_key
                .try_into()
                .map_err(|_| CryptoError::InvalidPublicKey)?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|_| CryptoError::InvalidPublicKey)?;
            let sig = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|_| CryptoError::InvalidSignatureFormat)?;
            key.verify(message, &sig)
                .map_err(|_| CryptoError::SignatureVerificationFailed)
        }
        AlgorithmId::EcdsaSecp256k1 => {
            use k256::ecdsa::signature::Verifier;
            let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|_| CryptoError::InvalidPublicKey)?;
            let sig = k256::ecdsa::Signature::from_slice(signature)
                .map_err(|_| CryptoError::InvalidSignatureFormat)?;
            key.verify(message, &sig)
                .map_err(|_| CryptoError::SignatureVerificationFailed)
        }
    }
}
