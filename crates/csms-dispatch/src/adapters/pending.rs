//! Correlator - matches replies to the requests that caused them.
//!
//! Flow:
//! 1. The dispatch core calls `register()` and gets an id plus a `Waiter`
//! 2. It sends the request frame carrying that id
//! 3. The inbound loop receives the reply and calls `complete()`
//! 4. The caller awaits the `Waiter`, which also enforces the deadline
//!
//! Exactly one of {reply, timeout, cancellation, channel loss} completes each
//! entry: every path removes the entry from the sharded map first, and only
//! the path that removed it delivers a result.

use crate::adapters::completions::RecentCompletions;
use crate::domain::correlation::RequestIdGenerator;
use crate::domain::error::{CorrelationError, DispatchError};
use crate::registry::InFlightGuard;
use csms_types::{MessageKind, PeerId, RequestId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Deadline used when a timeout does not fit the clock (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Successful reply as delivered to a waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Action named by the reply, if the peer included one.
    pub action: Option<MessageKind>,
    pub payload: serde_json::Value,
}

/// What a waiter receives.
pub type Completion = Result<Reply, DispatchError>;

/// Parameters of one registration.
pub struct Registration {
    pub destination: PeerId,
    /// Peer the request physically leaves through (the hub for routed requests).
    pub egress: PeerId,
    pub response_kind: MessageKind,
    pub timeout: Duration,
    /// Caller-chosen id; generated when absent.
    pub request_id: Option<RequestId>,
    /// Keeps the registry's in-flight count up while the entry is pending.
    pub guard: Option<InFlightGuard>,
}

impl Registration {
    pub fn new(destination: PeerId, response_kind: MessageKind, timeout: Duration) -> Self {
        Self {
            egress: destination.clone(),
            destination,
            response_kind,
            timeout,
            request_id: None,
            guard: None,
        }
    }

    #[must_use]
    pub fn via(mut self, egress: PeerId) -> Self {
        self.egress = egress;
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, id: Option<RequestId>) -> Self {
        self.request_id = id;
        self
    }

    #[must_use]
    pub fn with_guard(mut self, guard: InFlightGuard) -> Self {
        self.guard = Some(guard);
        self
    }
}

struct PendingEntry {
    sender: oneshot::Sender<Completion>,
    destination: PeerId,
    egress: PeerId,
    response_kind: MessageKind,
    timeout: Duration,
    deadline: Instant,
    created_at: Instant,
    _guard: Option<InFlightGuard>,
}

/// Read-only view of a pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequestInfo {
    pub request_id: RequestId,
    pub destination: PeerId,
    pub egress: PeerId,
    pub response_kind: MessageKind,
    pub deadline: Instant,
}

/// A request that was completed by `complete()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    pub request_id: RequestId,
    pub destination: PeerId,
    pub egress: PeerId,
    pub response_kind: MessageKind,
    pub elapsed: Duration,
}

/// Statistics for the correlator
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests completed by a reply
    pub total_completed: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total requests cancelled by the caller
    pub total_cancelled: AtomicU64,
    /// Total requests failed by connection loss or shutdown
    pub total_failed: AtomicU64,
    /// Total duplicate, unknown or wrong-peer completions reported
    pub total_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

struct Inner {
    pending: DashMap<RequestId, PendingEntry>,
    recent: RecentCompletions,
    ids: Arc<dyn RequestIdGenerator>,
    stats: CorrelatorStats,
}

/// Pending-request table of one CSMS instance. Cheap to clone.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<Inner>,
}

impl Correlator {
    pub fn new(ids: Arc<dyn RequestIdGenerator>, completion_memory: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                recent: RecentCompletions::new(completion_memory),
                ids,
                stats: CorrelatorStats::default(),
            }),
        }
    }

    /// Register a request with a generated id.
    pub fn register(
        &self,
        destination: PeerId,
        response_kind: MessageKind,
        timeout: Duration,
    ) -> (RequestId, Waiter) {
        self.register_generated(Registration::new(destination, response_kind, timeout))
    }

    /// Register with full control over id, egress and in-flight tracking.
    ///
    /// # Errors
    ///
    /// `DuplicateRequestId` if a caller-supplied id is already pending.
    pub fn try_register(
        &self,
        registration: Registration,
    ) -> Result<(RequestId, Waiter), DispatchError> {
        if registration.request_id.is_none() {
            return Ok(self.register_generated(registration));
        }
        self.register_with(registration)
            .map_err(|(id, _)| DispatchError::DuplicateRequestId(id))
    }

    fn register_generated(&self, mut registration: Registration) -> (RequestId, Waiter) {
        loop {
            // Generated ids only collide if the generator repeats itself.
            match self.register_with(registration) {
                Ok(registered) => return registered,
                Err((_, rejected)) => registration = rejected,
            }
        }
    }

    fn register_with(
        &self,
        mut registration: Registration,
    ) -> Result<(RequestId, Waiter), (RequestId, Registration)> {
        let id = registration
            .request_id
            .take()
            .unwrap_or_else(|| self.inner.ids.next_id());

        let slot = match self.inner.pending.entry(id.clone()) {
            Entry::Occupied(_) => return Err((id, registration)),
            Entry::Vacant(slot) => slot,
        };

        let now = Instant::now();
        let deadline = now
            .checked_add(registration.timeout.min(FAR_FUTURE))
            .unwrap_or(now + FAR_FUTURE);
        let (sender, receiver) = oneshot::channel();
        slot.insert(PendingEntry {
            sender,
            destination: registration.destination.clone(),
            egress: registration.egress.clone(),
            response_kind: registration.response_kind.clone(),
            timeout: registration.timeout,
            deadline,
            created_at: now,
            _guard: registration.guard,
        });

        self.inner.recent.forget(&id);
        self.inner
            .stats
            .total_registered
            .fetch_add(1, Ordering::Relaxed);

        debug!(
            request_id = %id,
            destination = %registration.destination,
            egress = %registration.egress,
            kind = %registration.response_kind,
            timeout_ms = millis(registration.timeout),
            "Registered pending request"
        );

        let waiter = Waiter {
            request_id: id.clone(),
            receiver,
            deadline,
            correlator: self.clone(),
            settled: false,
        };
        Ok((id, waiter))
    }

    fn finish(&self, id: &RequestId, entry: PendingEntry, result: Completion, outcome: Outcome) {
        self.inner.recent.record(id.clone());
        let stats = &self.inner.stats;
        let counter = match outcome {
            Outcome::Completed => &stats.total_completed,
            Outcome::TimedOut => &stats.total_timeouts,
            Outcome::Cancelled => &stats.total_cancelled,
            Outcome::Failed => &stats.total_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if entry.sender.send(result).is_err() {
            debug!(request_id = %id, ?outcome, "Waiter already gone");
        }
    }

    /// Complete a pending request with a reply or a protocol error that
    /// arrived from peer `from`.
    ///
    /// Only the egress peer the request left through may complete it.
    ///
    /// # Errors
    ///
    /// `WrongPeer` if the request is pending behind another egress (the entry
    /// stays pending), `DuplicateCompletion` if `id` completed recently,
    /// `UnknownRequest` if it was never pending. None affects any waiter.
    pub fn complete(
        &self,
        from: &PeerId,
        id: &RequestId,
        result: Completion,
    ) -> Result<CompletedRequest, CorrelationError> {
        let Some((id, entry)) = self
            .inner
            .pending
            .remove_if(id, |_, entry| &entry.egress == from)
        else {
            self.inner
                .stats
                .total_rejected
                .fetch_add(1, Ordering::Relaxed);
            if let Some(expected) = self.inner.pending.get(id).map(|e| e.egress.clone()) {
                return Err(CorrelationError::WrongPeer {
                    request_id: id.clone(),
                    expected,
                    actual: from.clone(),
                });
            }
            return Err(if self.inner.recent.contains(id) {
                CorrelationError::DuplicateCompletion(id.clone())
            } else {
                CorrelationError::UnknownRequest(id.clone())
            });
        };

        let completed = CompletedRequest {
            request_id: id.clone(),
            destination: entry.destination.clone(),
            egress: entry.egress.clone(),
            response_kind: entry.response_kind.clone(),
            elapsed: entry.created_at.elapsed(),
        };

        debug!(
            request_id = %id,
            kind = %completed.response_kind,
            response_time_ms = millis(completed.elapsed),
            "Completed pending request"
        );
        self.finish(&id, entry, result, Outcome::Completed);
        Ok(completed)
    }

    /// Cancel a pending request. Returns false if it already completed.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let Some((id, entry)) = self.inner.pending.remove(id) else {
            return false;
        };
        debug!(request_id = %id, "Cancelled pending request");
        let err = DispatchError::Cancelled {
            request_id: id.clone(),
        };
        self.finish(&id, entry, Err(err), Outcome::Cancelled);
        true
    }

    /// Drop an entry whose request was never sent. No result is delivered.
    pub(crate) fn discard(&self, id: &RequestId) {
        if self.inner.pending.remove(id).is_some() {
            debug!(request_id = %id, "Discarded unsent request");
        }
    }

    fn expire(&self, id: &RequestId, now: Instant) -> bool {
        let Some((id, entry)) = self
            .inner
            .pending
            .remove_if(id, |_, entry| entry.deadline <= now)
        else {
            return false;
        };

        warn!(
            request_id = %id,
            destination = %entry.destination,
            kind = %entry.response_kind,
            timeout_ms = millis(entry.timeout),
            "Request timed out"
        );
        let err = DispatchError::RequestTimeout {
            request_id: id.clone(),
            timeout_ms: millis(entry.timeout),
        };
        self.finish(&id, entry, Err(err), Outcome::TimedOut);
        true
    }

    /// Complete every entry whose deadline is at or before `now` with
    /// `RequestTimeout`. Returns how many expired.
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let overdue = self.ids_where(|entry| entry.deadline <= now);
        overdue.iter().filter(|id| self.expire(id, now)).count()
    }

    /// Fail every entry whose request left through `egress`.
    pub fn fail_via(&self, egress: &PeerId, reason: &str) -> usize {
        let affected = self.ids_where(|entry| &entry.egress == egress);
        let failed = affected
            .iter()
            .filter(|id| {
                self.fail_one(id, reason, |entry| &entry.egress == egress)
            })
            .count();
        if failed > 0 {
            warn!(egress = %egress, failed, reason, "Failed requests after connection loss");
        }
        failed
    }

    /// Fail every pending entry.
    pub fn fail_all(&self, reason: &str) -> usize {
        let all = self.ids_where(|_| true);
        all.iter().filter(|id| self.fail_one(id, reason, |_| true)).count()
    }

    fn fail_one(
        &self,
        id: &RequestId,
        reason: &str,
        still_applies: impl Fn(&PendingEntry) -> bool,
    ) -> bool {
        let Some((id, entry)) = self.inner.pending.remove_if(id, |_, e| still_applies(e)) else {
            return false;
        };
        let err = DispatchError::ChannelUnavailable {
            peer: entry.egress.clone(),
            reason: reason.to_string(),
        };
        self.finish(&id, entry, Err(err), Outcome::Failed);
        true
    }

    fn ids_where(&self, predicate: impl Fn(&PendingEntry) -> bool) -> Vec<RequestId> {
        self.inner
            .pending
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Check if a request is pending
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.inner.pending.contains_key(id)
    }

    /// Snapshot of pending entries.
    pub fn pending_requests(&self) -> Vec<PendingRequestInfo> {
        self.inner
            .pending
            .iter()
            .map(|e| PendingRequestInfo {
                request_id: e.key().clone(),
                destination: e.destination.clone(),
                egress: e.egress.clone(),
                response_kind: e.response_kind.clone(),
                deadline: e.deadline,
            })
            .collect()
    }

    pub fn stats(&self) -> &CorrelatorStats {
        &self.inner.stats
    }

    pub fn recent_completions(&self) -> &RecentCompletions {
        &self.inner.recent
    }
}

/// Awaitable side of a registration.
///
/// The deadline is enforced here as well as by the sweep, so a timeout is
/// delivered on time regardless of the sweep interval. Dropping a waiter
/// before it settles cancels the request.
pub struct Waiter {
    request_id: RequestId,
    receiver: oneshot::Receiver<Completion>,
    deadline: Instant,
    correlator: Correlator,
    settled: bool,
}

impl Waiter {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            request_id: self.request_id.clone(),
            correlator: self.correlator.clone(),
        }
    }

    /// Wait for the completion.
    pub async fn wait(mut self) -> Completion {
        let received = match tokio::time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(received) => received,
            Err(_) => {
                self.correlator.expire(&self.request_id, Instant::now());
                // Whichever path removed the entry delivers on the channel.
                (&mut self.receiver).await
            }
        };
        self.settled = true;
        received.unwrap_or_else(|_| {
            Err(DispatchError::Cancelled {
                request_id: self.request_id.clone(),
            })
        })
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.settled {
            self.correlator.cancel(&self.request_id);
        }
    }
}

/// Cancels one pending request from anywhere.
#[derive(Clone)]
pub struct CancelHandle {
    request_id: RequestId,
    correlator: Correlator,
}

impl CancelHandle {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Cancel; returns false if the request already completed.
    pub fn cancel(&self) -> bool {
        self.correlator.cancel(&self.request_id)
    }
}

/// Background task expiring overdue requests until `shutdown` flips to true.
pub fn spawn_sweeper(
    correlator: Correlator,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let expired = correlator.expire_overdue(now);
                    let purged = correlator.recent_completions().purge(now);
                    if expired > 0 || purged > 0 {
                        debug!(expired, purged, "Correlator sweep");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Correlator sweep stopped");
    })
}
