//! # Channel Registry
//!
//! Owns the transport channels of one CSMS instance and the live binding of
//! each connected peer to the channel it connected on.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --start()--> Running --shutdown()--> Draining --> Stopped
//! ```
//!
//! - `start()` starts every channel and spawns one pump task per channel that
//!   turns channel events into binding updates and [`RegistryEvent`]s.
//! - `shutdown()` stops accepting connections, optionally waits (bounded by a
//!   grace period) for in-flight work to finish, then closes every channel.
//! - A second `shutdown()` is a no-op.
//!
//! ## Bindings
//!
//! A peer is bound to the channel it most recently connected on. A connect on
//! a different channel rehomes the peer. A disconnect only unbinds the peer
//! if it came from the channel the peer is currently bound to, so a late
//! disconnect from the old channel never tears down the new binding.

use crate::domain::error::DispatchError;
use crate::domain::routing::{DirectBindings, Egress};
use crate::ports::channel::{Channel, ChannelError, ChannelEvent, ChannelId};
use csms_types::{Frame, PeerId};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counts work that shutdown should wait for.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one unit of work as started. It ends when the guard drops.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolve once nothing is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps one unit of work counted as in flight.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Inbound activity surfaced to the dispatch core.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A frame from a bound peer.
    Frame {
        peer: PeerId,
        channel: ChannelId,
        frame: Frame,
    },
    /// A peer's current binding went away.
    PeerLost { peer: PeerId, channel: ChannelId },
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// In-flight work reached zero before the channels were closed.
    pub drained: bool,
    /// In-flight work still counted when the channels were closed.
    pub remaining: usize,
    /// Peer bindings dropped by closing the channels.
    pub peers_closed: usize,
}

/// Registry lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Channel registry was already started")]
    AlreadyStarted,

    #[error("Channel registry is stopped")]
    Stopped,

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Clone)]
struct Binding {
    channel_id: ChannelId,
    channel: Arc<dyn Channel>,
}

pub struct ChannelRegistry {
    channels: RwLock<Vec<Arc<dyn Channel>>>,
    bindings: Arc<DashMap<PeerId, Binding>>,
    state: RwLock<RegistryState>,
    in_flight: Arc<InFlight>,
    inbound_buffer: usize,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    inbound_tx: Mutex<Option<mpsc::Sender<RegistryEvent>>>,
}

impl ChannelRegistry {
    pub fn new(inbound_buffer: usize) -> Self {
        Self::with_channels(Vec::new(), inbound_buffer)
    }

    pub fn with_channels(channels: Vec<Arc<dyn Channel>>, inbound_buffer: usize) -> Self {
        Self {
            channels: RwLock::new(channels),
            bindings: Arc::new(DashMap::new()),
            state: RwLock::new(RegistryState::Idle),
            in_flight: Arc::new(InFlight::new()),
            inbound_buffer: inbound_buffer.max(1),
            pumps: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(None),
        }
    }

    /// Add a channel. Started immediately if the registry is running.
    pub async fn register(&self, channel: Arc<dyn Channel>) -> Result<(), RegistryError> {
        let id = channel.id().clone();
        {
            let mut channels = self.channels.write();
            if channels.iter().any(|c| c.id() == &id) {
                return Err(ChannelError::DuplicateChannel(id).into());
            }
            if matches!(self.state(), RegistryState::Draining | RegistryState::Stopped) {
                return Err(RegistryError::Stopped);
            }
            channels.push(Arc::clone(&channel));
        }

        if self.state() == RegistryState::Running {
            let outbound = self.inbound_tx.lock().clone();
            if let Some(outbound) = outbound {
                self.start_channel(channel, outbound).await?;
            }
        }
        info!(channel = %id, "Channel registered");
        Ok(())
    }

    /// Start every channel and return the stream of inbound events.
    pub async fn start(&self) -> Result<mpsc::Receiver<RegistryEvent>, RegistryError> {
        {
            let mut state = self.state.write();
            match *state {
                RegistryState::Idle => *state = RegistryState::Running,
                RegistryState::Running => return Err(RegistryError::AlreadyStarted),
                RegistryState::Draining | RegistryState::Stopped => {
                    return Err(RegistryError::Stopped)
                }
            }
        }

        let (tx, rx) = mpsc::channel(self.inbound_buffer);
        *self.inbound_tx.lock() = Some(tx.clone());

        let channels = self.channels.read().clone();
        for channel in channels {
            if let Err(e) = self.start_channel(Arc::clone(&channel), tx.clone()).await {
                error!(channel = %channel.id(), error = %e, "Channel failed to start");
                self.close_all().await;
                *self.state.write() = RegistryState::Stopped;
                return Err(e.into());
            }
        }

        info!(channels = self.channel_count(), "Channel registry started");
        Ok(rx)
    }

    async fn start_channel(
        &self,
        channel: Arc<dyn Channel>,
        outbound: mpsc::Sender<RegistryEvent>,
    ) -> Result<(), ChannelError> {
        let (events_tx, events_rx) = mpsc::channel(self.inbound_buffer);
        let pump = tokio::spawn(pump(
            Arc::clone(&channel),
            events_rx,
            Arc::clone(&self.bindings),
            outbound,
        ));
        self.pumps.lock().push(pump);
        channel.start(events_tx).await
    }

    /// Send `frame` to the egress peer over the channel it is bound to.
    pub async fn send(&self, egress: &Egress, frame: Frame) -> Result<(), DispatchError> {
        let peer = egress.peer();
        match self.state() {
            RegistryState::Running => {}
            RegistryState::Idle => {
                return Err(DispatchError::ChannelUnavailable {
                    peer: peer.clone(),
                    reason: "channel registry not started".into(),
                })
            }
            RegistryState::Draining | RegistryState::Stopped => {
                return Err(DispatchError::ShuttingDown)
            }
        }

        let binding = self
            .bindings
            .get(peer)
            .map(|b| b.value().clone())
            .ok_or_else(|| DispatchError::ChannelUnavailable {
                peer: peer.clone(),
                reason: "no live connection".into(),
            })?;

        let _guard = self.in_flight.enter();
        binding.channel.send(peer, frame).await.map_err(|e| {
            warn!(peer = %peer, channel = %binding.channel_id, error = %e, "Send failed");
            DispatchError::from(e)
        })
    }

    /// Stop the registry.
    ///
    /// With `wait`, in-flight work gets up to `grace` to finish before the
    /// channels are closed.
    pub async fn shutdown(&self, reason: &str, wait: bool, grace: Duration) -> ShutdownReport {
        {
            let mut state = self.state.write();
            match *state {
                RegistryState::Draining | RegistryState::Stopped => {
                    debug!(reason, "Channel registry already shutting down");
                    return ShutdownReport::default();
                }
                RegistryState::Idle | RegistryState::Running => {
                    *state = RegistryState::Draining;
                }
            }
        }
        info!(reason, wait, grace_ms = grace.as_millis() as u64, "Channel registry shutting down");

        let channels = self.channels.read().clone();
        join_all(channels.iter().map(|c| c.stop_accepting())).await;

        let drained = if wait {
            tokio::time::timeout(grace, self.in_flight.wait_idle())
                .await
                .is_ok()
        } else {
            self.in_flight.count() == 0
        };
        let remaining = self.in_flight.count();
        if !drained {
            warn!(remaining, "Grace period ended with work still in flight");
        }

        let peers_closed = self.bindings.len();
        self.close_all().await;
        *self.state.write() = RegistryState::Stopped;

        info!(drained, remaining, peers_closed, "Channel registry stopped");
        ShutdownReport {
            drained,
            remaining,
            peers_closed,
        }
    }

    async fn close_all(&self) {
        let channels = self.channels.read().clone();
        join_all(channels.iter().map(|c| c.close())).await;
        self.bindings.clear();
        self.inbound_tx.lock().take();
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
    }

    /// Count one unit of in-flight work until the guard drops.
    pub fn track(&self) -> InFlightGuard {
        self.in_flight.enter()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.count()
    }

    pub fn state(&self) -> RegistryState {
        *self.state.read()
    }

    /// Channel `peer` is currently bound to.
    pub fn binding(&self, peer: &PeerId) -> Option<ChannelId> {
        self.bindings.get(peer).map(|b| b.channel_id.clone())
    }

    pub fn bound_peers(&self) -> Vec<PeerId> {
        self.bindings.iter().map(|b| b.key().clone()).collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

impl DirectBindings for ChannelRegistry {
    fn is_directly_bound(&self, peer: &PeerId) -> bool {
        self.bindings.contains_key(peer)
    }
}

async fn pump(
    channel: Arc<dyn Channel>,
    mut events: mpsc::Receiver<ChannelEvent>,
    bindings: Arc<DashMap<PeerId, Binding>>,
    outbound: mpsc::Sender<RegistryEvent>,
) {
    let channel_id = channel.id().clone();

    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Connected(peer) => {
                let binding = Binding {
                    channel_id: channel_id.clone(),
                    channel: Arc::clone(&channel),
                };
                match bindings.insert(peer.clone(), binding) {
                    Some(previous) if previous.channel_id != channel_id => {
                        info!(peer = %peer, from = %previous.channel_id, to = %channel_id, "Peer rehomed");
                    }
                    Some(_) => debug!(peer = %peer, channel = %channel_id, "Peer reconnected"),
                    None => info!(peer = %peer, channel = %channel_id, "Peer connected"),
                }
            }
            ChannelEvent::Disconnected(peer) => {
                let removed = bindings
                    .remove_if(&peer, |_, b| b.channel_id == channel_id)
                    .is_some();
                if !removed {
                    debug!(peer = %peer, channel = %channel_id, "Ignoring disconnect from stale channel");
                    continue;
                }
                info!(peer = %peer, channel = %channel_id, "Peer disconnected");
                let lost = RegistryEvent::PeerLost {
                    peer,
                    channel: channel_id.clone(),
                };
                if outbound.send(lost).await.is_err() {
                    break;
                }
            }
            ChannelEvent::Frame(peer, frame) => {
                let inbound = RegistryEvent::Frame {
                    peer,
                    channel: channel_id.clone(),
                    frame,
                };
                if outbound.send(inbound).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(channel = %channel_id, "Channel pump stopped");
}
