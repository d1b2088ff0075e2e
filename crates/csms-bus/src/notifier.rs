//! # Event Notifier
//!
//! Subscriber table indexed by (phase, kind), with wildcard entries for
//! handlers that want every kind.
//!
//! ## Firing
//!
//! Each matching handler runs on its own task. `fire` waits for them up to the
//! budget; anything still running afterwards is aborted and counted as an
//! overrun. Errors and panics are logged at `warn`.

use crate::events::{HandlerError, KindedEvent, Notification, Phase};
use crate::subscriber::AuditStream;
use crate::{DEFAULT_AUDIT_CAPACITY, DEFAULT_BUDGET_MS};
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

type Handler<E> = Arc<dyn Fn(E) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Handle identifying one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of one `fire` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Handlers invoked.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
    /// Handlers still running when the budget ran out.
    pub overran: usize,
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Notifications fired.
    pub fired: u64,
    /// Handler failures (errors and panics).
    pub handler_failures: u64,
    /// Handlers that exceeded the budget.
    pub handler_overruns: u64,
}

type TableKey<K> = (Phase, Option<K>);

/// Aborts handler tasks still running when a `fire` ends, whether it ran out
/// of budget or was itself dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Kind-indexed publish/subscribe for dispatch notifications.
pub struct EventNotifier<E: KindedEvent> {
    handlers: RwLock<HashMap<TableKey<E::Kind>, Vec<(SubscriptionId, Handler<E>)>>>,
    audit: broadcast::Sender<Notification<E>>,
    budget: Duration,
    next_id: AtomicU64,
    fired: AtomicU64,
    failures: AtomicU64,
    overruns: AtomicU64,
}

impl<E: KindedEvent> EventNotifier<E> {
    /// Create a notifier with the default budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_budget(Duration::from_millis(DEFAULT_BUDGET_MS))
    }

    /// Create a notifier with a custom firing budget.
    #[must_use]
    pub fn with_budget(budget: Duration) -> Self {
        let (audit, _) = broadcast::channel(DEFAULT_AUDIT_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            audit,
            budget,
            next_id: AtomicU64::new(1),
            fired: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    /// Firing budget.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Register a handler for `phase`. `kind = None` matches every kind.
    pub fn subscribe<F, Fut>(&self, phase: Phase, kind: Option<E::Kind>, handler: F) -> SubscriptionId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler<E> = Arc::new(move |event| handler(event).boxed());
        debug!(phase = %phase, kind = ?kind.as_ref().map(ToString::to_string), "Handler subscribed");
        self.handlers
            .write()
            .entry((phase, kind))
            .or_default()
            .push((id, handler));
        id
    }

    /// Register a handler run before requests of `kind` are sent.
    pub fn on_before_send<F, Fut>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(Phase::BeforeSend, Some(kind), handler)
    }

    /// Register a handler run after replies to requests of `kind` arrive.
    pub fn on_after_receive<F, Fut>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(Phase::AfterReceive, Some(kind), handler)
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.handlers.write();
        let mut found = false;
        table.retain(|_, list| {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            found |= list.len() != before;
            !list.is_empty()
        });
        found
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    /// Audit stream of every notification, optionally for one kind only.
    #[must_use]
    pub fn stream(&self, kind: Option<E::Kind>) -> AuditStream<E> {
        AuditStream::new(self.audit.subscribe(), kind)
    }

    /// Counters since construction.
    #[must_use]
    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            fired: self.fired.load(Ordering::Relaxed),
            handler_failures: self.failures.load(Ordering::Relaxed),
            handler_overruns: self.overruns.load(Ordering::Relaxed),
        }
    }

    fn matching(&self, phase: Phase, kind: &E::Kind) -> Vec<Handler<E>> {
        let table = self.handlers.read();
        [
            table.get(&(phase, Some(kind.clone()))),
            table.get(&(phase, None)),
        ]
        .into_iter()
        .flatten()
        .flat_map(|list| list.iter().map(|(_, h)| Arc::clone(h)))
        .collect()
    }

    /// Notify subscribers. Never fails; returns within the budget.
    pub async fn fire(&self, phase: Phase, event: E) -> FireReport {
        self.fired.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind().clone();

        // No audit readers is the normal case.
        let _ = self.audit.send(Notification {
            phase,
            fired_at: Utc::now(),
            event: event.clone(),
        });

        let handlers = self.matching(phase, &kind);
        let mut report = FireReport {
            invoked: handlers.len(),
            ..FireReport::default()
        };
        if handlers.is_empty() {
            return report;
        }

        let tasks: Vec<_> = handlers
            .into_iter()
            .map(|handler| tokio::spawn(handler(event.clone())))
            .collect();
        let aborts = AbortOnDrop(tasks.iter().map(|t| t.abort_handle()).collect());

        match tokio::time::timeout(self.budget, join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    let failure = match result {
                        Ok(Ok(())) => continue,
                        Ok(Err(e)) => e.to_string(),
                        Err(join) if join.is_panic() => "handler panicked".to_string(),
                        Err(join) => join.to_string(),
                    };
                    report.failed += 1;
                    warn!(phase = %phase, kind = %kind, error = %failure, "Notification handler failed");
                }
            }
            Err(_) => {
                report.overran = aborts.0.iter().filter(|a| !a.is_finished()).count();
                warn!(
                    phase = %phase,
                    kind = %kind,
                    overran = report.overran,
                    budget_ms = self.budget.as_millis() as u64,
                    "Notification handlers exceeded budget"
                );
            }
        }

        self.failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.overruns
            .fetch_add(report.overran as u64, Ordering::Relaxed);
        report
    }
}

impl<E: KindedEvent> Default for EventNotifier<E> {
    fn default() -> Self {
        Self::new()
    }
}
