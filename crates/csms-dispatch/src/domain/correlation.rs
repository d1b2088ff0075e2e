//! Identifier generation for request correlation.
//!
//! The default generator uses UUID v7: time-ordered, so ids sort roughly by
//! dispatch time in logs, and 36 characters, which fits the protocol's
//! message id limit.

use csms_types::RequestId;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of request identifiers.
pub trait RequestIdGenerator: Send + Sync {
    /// Produce an id not currently in flight.
    fn next_id(&self) -> RequestId;
}

/// UUID v7 generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Generator;

impl RequestIdGenerator for UuidV7Generator {
    fn next_id(&self) -> RequestId {
        RequestId::from_uuid(Uuid::now_v7())
    }
}

/// `<prefix>-<n>` generator for deterministic logs and tests.
#[derive(Debug)]
pub struct SequentialGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl RequestIdGenerator for SequentialGenerator {
    fn next_id(&self) -> RequestId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        RequestId::new(format!("{}-{n}", self.prefix))
    }
}
