//! # Encryption Context Store
//!
//! Per-peer symmetric key material keyed by (peer, optional key slot).
//!
//! ## Concurrency
//!
//! Contexts live in a sharded map; each context keeps its nonce and counter in
//! atomics, so concurrent encryptions toward different peers never contend on
//! a shared lock, and concurrent encryptions toward the same peer serialize
//! only on the counter's atomic read-modify-write.
//!
//! ## Invariants
//!
//! - `next_counter` returns the pre-increment value and never returns the same
//!   value twice for a (peer, slot) while the context exists.
//! - Reconfiguring a live context replaces keys but never moves the counter
//!   backwards.
//! - Key material leaves this module only through the key accessors.

use crate::symmetric::{self, Direction, SecretKey};
use crate::CryptoError;
use csms_types::{PeerId, SealedPayload};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lookup key of an encryption context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    /// Peer the context belongs to.
    pub peer: PeerId,
    /// Optional key slot when a peer holds several contexts.
    pub key_slot: Option<u16>,
}

impl ContextKey {
    /// Create a context key.
    pub fn new(peer: PeerId, key_slot: Option<u16>) -> Self {
        Self { peer, key_slot }
    }
}

/// Material used to create or update a context.
#[derive(Debug, Clone)]
pub struct ContextMaterial {
    /// Key for outbound payloads.
    pub encrypt_key: SecretKey,
    /// Key for inbound payloads.
    pub decrypt_key: SecretKey,
    /// Starting nonce.
    pub nonce: u64,
    /// Starting counter.
    pub counter: u64,
}

#[derive(Clone)]
struct KeyPair {
    encrypt: SecretKey,
    decrypt: SecretKey,
}

struct EncryptionContext {
    keys: RwLock<KeyPair>,
    nonce: AtomicU64,
    counter: AtomicU64,
    /// Lowest inbound counter still acceptable (last accepted + 1).
    inbound_floor: AtomicU64,
}

impl EncryptionContext {
    fn new(material: ContextMaterial) -> Self {
        Self {
            keys: RwLock::new(KeyPair {
                encrypt: material.encrypt_key,
                decrypt: material.decrypt_key,
            }),
            nonce: AtomicU64::new(material.nonce),
            counter: AtomicU64::new(material.counter),
            inbound_floor: AtomicU64::new(0),
        }
    }

    fn take(cell: &AtomicU64, peer: &PeerId) -> Result<u64, CryptoError> {
        cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(1))
            .map_err(|_| CryptoError::CounterExhausted(peer.clone()))
    }

    fn accept_inbound(&self, counter: u64) -> Result<(), CryptoError> {
        self.inbound_floor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |floor| {
                (counter >= floor).then(|| counter.saturating_add(1))
            })
            .map(|_| ())
            .map_err(|floor| CryptoError::ReplayDetected {
                counter,
                last_accepted: floor.saturating_sub(1),
            })
    }
}

/// Store of encryption contexts owned by one CSMS instance.
///
/// The store knows which end of the connection it sits on: payloads it seals
/// travel `outbound`, payloads it opens travel the other way.
pub struct EncryptionContextStore {
    contexts: DashMap<ContextKey, Arc<EncryptionContext>>,
    outbound: Direction,
}

impl Default for EncryptionContextStore {
    fn default() -> Self {
        Self::with_direction(Direction::CentralToStation)
    }
}

impl EncryptionContextStore {
    /// Create an empty store for the central system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store for the station end (simulators, test peers).
    pub fn for_station() -> Self {
        Self::with_direction(Direction::StationToCentral)
    }

    fn with_direction(outbound: Direction) -> Self {
        Self {
            contexts: DashMap::new(),
            outbound,
        }
    }

    /// Direction of the payloads this store seals.
    pub fn outbound(&self) -> Direction {
        self.outbound
    }

    /// Create or update the context for (peer, slot).
    ///
    /// On update the keys and nonce are replaced and the counter becomes
    /// `max(current, material.counter)`.
    pub fn configure(&self, peer: PeerId, key_slot: Option<u16>, material: ContextMaterial) {
        let key = ContextKey::new(peer, key_slot);
        let fingerprint = material.encrypt_key.fingerprint();

        match self.contexts.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let ctx = entry.get();
                *ctx.keys.write() = KeyPair {
                    encrypt: material.encrypt_key,
                    decrypt: material.decrypt_key,
                };
                ctx.nonce.store(material.nonce, Ordering::Release);
                ctx.counter.fetch_max(material.counter, Ordering::AcqRel);
                info!(
                    peer = %key.peer,
                    key_slot = ?key.key_slot,
                    key_fp = %fingerprint,
                    "Encryption context updated"
                );
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(EncryptionContext::new(material)));
                info!(
                    peer = %key.peer,
                    key_slot = ?key.key_slot,
                    key_fp = %fingerprint,
                    "Encryption context created"
                );
            }
        }
    }

    /// Remove the context for (peer, slot). Returns whether one existed.
    pub fn remove(&self, peer: &PeerId, key_slot: Option<u16>) -> bool {
        let removed = self
            .contexts
            .remove(&ContextKey::new(peer.clone(), key_slot))
            .is_some();
        if removed {
            debug!(peer = %peer, key_slot = ?key_slot, "Encryption context removed");
        }
        removed
    }

    /// Remove every context of a deprovisioned peer. Returns how many were removed.
    pub fn deprovision(&self, peer: &PeerId) -> usize {
        let before = self.contexts.len();
        self.contexts.retain(|key, _| &key.peer != peer);
        let removed = before.saturating_sub(self.contexts.len());
        info!(peer = %peer, removed, "Peer deprovisioned from encryption store");
        removed
    }

    /// Whether a context exists for (peer, slot).
    pub fn contains(&self, peer: &PeerId, key_slot: Option<u16>) -> bool {
        self.contexts
            .contains_key(&ContextKey::new(peer.clone(), key_slot))
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    fn context(
        &self,
        peer: &PeerId,
        key_slot: Option<u16>,
    ) -> Result<Arc<EncryptionContext>, CryptoError> {
        self.contexts
            .get(&ContextKey::new(peer.clone(), key_slot))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CryptoError::KeyNotConfigured {
                peer: peer.clone(),
                key_slot,
            })
    }

    /// Encryption key of (peer, slot).
    pub fn encryption_key(
        &self,
        peer: &PeerId,
        key_slot: Option<u16>,
    ) -> Result<SecretKey, CryptoError> {
        Ok(self.context(peer, key_slot)?.keys.read().encrypt.clone())
    }

    /// Decryption key of (peer, slot).
    pub fn decryption_key(
        &self,
        peer: &PeerId,
        key_slot: Option<u16>,
    ) -> Result<SecretKey, CryptoError> {
        Ok(self.context(peer, key_slot)?.keys.read().decrypt.clone())
    }

    /// Read-then-increment the nonce; returns the pre-increment value.
    pub fn next_nonce(&self, peer: &PeerId, key_slot: Option<u16>) -> Result<u64, CryptoError> {
        let ctx = self.context(peer, key_slot)?;
        EncryptionContext::take(&ctx.nonce, peer)
    }

    /// Read-then-increment the counter; returns the pre-increment value.
    pub fn next_counter(&self, peer: &PeerId, key_slot: Option<u16>) -> Result<u64, CryptoError> {
        let ctx = self.context(peer, key_slot)?;
        EncryptionContext::take(&ctx.counter, peer)
    }

    /// Seal a payload toward `peer`, consuming one counter value.
    ///
    /// The peer id is bound into the AEAD tag, so a payload sealed for one
    /// station cannot be replayed to another holding the same key.
    pub fn seal(
        &self,
        peer: &PeerId,
        key_slot: Option<u16>,
        plaintext: &[u8],
    ) -> Result<SealedPayload, CryptoError> {
        let ctx = self.context(peer, key_slot)?;
        let counter = EncryptionContext::take(&ctx.counter, peer)?;
        let nonce = ctx.nonce.load(Ordering::Acquire);
        let key = ctx.keys.read().encrypt.clone();

        let ciphertext = symmetric::seal(
            &key,
            nonce,
            counter,
            key_slot,
            self.outbound,
            peer.as_str().as_bytes(),
            plaintext,
        )?;

        debug!(peer = %peer, key_slot = ?key_slot, counter, "Payload sealed");

        Ok(SealedPayload {
            key_slot,
            nonce,
            counter,
            ciphertext: hex::encode(ciphertext),
        })
    }

    /// Open a payload sealed by `peer` with its matching context.
    ///
    /// Inbound counters must strictly increase per context.
    pub fn open(&self, peer: &PeerId, sealed: &SealedPayload) -> Result<Vec<u8>, CryptoError> {
        let ctx = self.context(peer, sealed.key_slot)?;
        let ciphertext = hex::decode(&sealed.ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        let key = ctx.keys.read().decrypt.clone();

        let plaintext = symmetric::open(
            &key,
            sealed.nonce,
            sealed.counter,
            sealed.key_slot,
            self.outbound.reverse(),
            peer.as_str().as_bytes(),
            &ciphertext,
        )?;

        if let Err(e) = ctx.accept_inbound(sealed.counter) {
            warn!(peer = %peer, counter = sealed.counter, "Rejected replayed sealed payload");
            return Err(e);
        }

        Ok(plaintext)
    }
}
