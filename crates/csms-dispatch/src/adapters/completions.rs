//! # Recent Completions
//!
//! Time-bounded memory of request ids that completed, used to tell a late or
//! second reply (`DuplicateCompletion`) from a reply nobody asked for
//! (`UnknownRequest`).
//!
//! Entries older than the retention window are garbage-collected lazily on
//! insert and explicitly by the sweep task, so memory stays bounded by the
//! completion rate times the window.

use csms_types::RequestId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default retention window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(120);

/// Minimum spacing between opportunistic garbage collections.
const GC_INTERVAL: Duration = Duration::from_secs(10);

pub struct RecentCompletions {
    /// Request id -> when it completed.
    seen: DashMap<RequestId, Instant>,
    retention: Duration,
    last_gc: Mutex<Instant>,
}

impl RecentCompletions {
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            retention,
            last_gc: Mutex::new(Instant::now()),
        }
    }

    /// Remember that `id` completed now.
    pub fn record(&self, id: RequestId) {
        let now = Instant::now();
        self.seen.insert(id, now);

        let due = {
            let mut last = self.last_gc.lock();
            if now.saturating_duration_since(*last) > GC_INTERVAL {
                *last = now;
                true
            } else {
                false
            }
        };
        if due {
            self.purge(now);
        }
    }

    /// Whether `id` completed within the retention window.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.seen
            .get(id)
            .is_some_and(|at| at.elapsed() <= self.retention)
    }

    /// Forget `id`, e.g. because a caller reuses it for a new request.
    pub fn forget(&self, id: &RequestId) {
        self.seen.remove(id);
    }

    /// Drop entries older than the retention window. Returns how many went.
    pub fn purge(&self, now: Instant) -> usize {
        let before = self.seen.len();
        let retention = self.retention;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) <= retention);
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for RecentCompletions {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
