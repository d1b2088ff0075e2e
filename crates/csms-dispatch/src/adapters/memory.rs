//! In-process channel.
//!
//! Peers "connect" by calling [`MemoryChannel::connect`] and get a
//! [`RemotePeer`] handle that plays the station (or hub) side: it receives
//! the frames the CSMS sends and can deliver frames back. Used by tests and
//! by embedders that co-host a simulator with the CSMS.

use crate::ports::channel::{Channel, ChannelError, ChannelEvent, ChannelId};
use async_trait::async_trait;
use csms_types::{Frame, PeerId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

struct Connection {
    generation: u64,
    outbox: mpsc::UnboundedSender<Frame>,
}

struct Shared {
    id: ChannelId,
    events: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    peers: DashMap<PeerId, Connection>,
    accepting: AtomicBool,
    closed: AtomicBool,
    generation: AtomicU64,
}

impl Shared {
    fn events(&self) -> Result<mpsc::Sender<ChannelEvent>, ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed(self.id.clone()));
        }
        self.events
            .lock()
            .clone()
            .ok_or_else(|| ChannelError::NotStarted(self.id.clone()))
    }
}

/// Channel whose connections live in the same process.
#[derive(Clone)]
pub struct MemoryChannel {
    shared: Arc<Shared>,
}

impl MemoryChannel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: ChannelId::new(id),
                events: Mutex::new(None),
                peers: DashMap::new(),
                accepting: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Connect `peer`. A second connect for the same peer replaces the first.
    pub async fn connect(&self, peer: impl Into<PeerId>) -> Result<RemotePeer, ChannelError> {
        let peer = peer.into();
        let events = self.shared.events()?;
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(ChannelError::Closed(self.shared.id.clone()));
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.shared
            .peers
            .insert(peer.clone(), Connection { generation, outbox });

        events
            .send(ChannelEvent::Connected(peer.clone()))
            .await
            .map_err(|_| ChannelError::Closed(self.shared.id.clone()))?;
        debug!(channel = %self.shared.id, peer = %peer, "Memory peer connected");

        Ok(RemotePeer {
            peer,
            generation,
            inbox,
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.shared.peers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn id(&self) -> &ChannelId {
        &self.shared.id
    }

    async fn start(&self, events: mpsc::Sender<ChannelEvent>) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(self.shared.id.clone()));
        }
        let mut slot = self.shared.events.lock();
        if slot.is_some() {
            return Err(ChannelError::AlreadyStarted(self.shared.id.clone()));
        }
        *slot = Some(events);
        self.shared.accepting.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, peer: &PeerId, frame: Frame) -> Result<(), ChannelError> {
        let outbox = self
            .shared
            .peers
            .get(peer)
            .map(|conn| conn.outbox.clone())
            .ok_or_else(|| ChannelError::NotConnected(peer.clone()))?;

        outbox.send(frame).map_err(|_| ChannelError::SendFailed {
            peer: peer.clone(),
            reason: "remote end dropped".into(),
        })
    }

    async fn stop_accepting(&self) {
        self.shared.accepting.store(false, Ordering::Release);
    }

    async fn close(&self) {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.closed.store(true, Ordering::Release);
        let dropped = self.shared.peers.len();
        self.shared.peers.clear();
        self.shared.events.lock().take();
        debug!(channel = %self.shared.id, dropped, "Memory channel closed");
    }
}

/// Remote end of one in-process connection.
pub struct RemotePeer {
    peer: PeerId,
    generation: u64,
    inbox: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
}

impl RemotePeer {
    pub fn id(&self) -> &PeerId {
        &self.peer
    }

    /// Next frame the CSMS sent to this peer. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.inbox.try_recv().ok()
    }

    fn is_current(&self) -> bool {
        self.shared
            .peers
            .get(&self.peer)
            .is_some_and(|conn| conn.generation == self.generation)
    }

    /// Send a frame from this peer to the CSMS.
    pub async fn deliver(&self, frame: Frame) -> Result<(), ChannelError> {
        if !self.is_current() {
            return Err(ChannelError::NotConnected(self.peer.clone()));
        }
        self.shared
            .events()?
            .send(ChannelEvent::Frame(self.peer.clone(), frame))
            .await
            .map_err(|_| ChannelError::Closed(self.shared.id.clone()))
    }

    /// Drop the connection and report it.
    pub async fn disconnect(self) {
        let generation = self.generation;
        let removed = self
            .shared
            .peers
            .remove_if(&self.peer, |_, conn| conn.generation == generation)
            .is_some();
        if !removed {
            return;
        }
        if let Ok(events) = self.shared.events() {
            let _ = events
                .send(ChannelEvent::Disconnected(self.peer.clone()))
                .await;
        }
        debug!(channel = %self.shared.id, peer = %self.peer, "Memory peer disconnected");
    }
}
