//! CSMS Dispatch Core
//!
//! One `Csms` value owns every piece of mutable dispatch state: routes, keys,
//! signature policy, pending requests and channels. Independent instances
//! never share state.
//!
//! # Send path
//!
//! ```text
//! resolve egress -> signature policy -> encode (+ seal) -> register
//!     -> sign -> BeforeSend -> registry.send
//! ```
//!
//! # Receive path
//!
//! The inbound loop takes registry events: replies complete the correlator
//! entry with the same request id (then `AfterReceive` fires), and a lost
//! peer fails only the requests that left through it.

use crate::adapters::pending::{spawn_sweeper, CancelHandle, Correlator, Registration, Reply, Waiter};
use crate::domain::config::{ConfigError, CsmsConfig};
use crate::domain::correlation::{RequestIdGenerator, UuidV7Generator};
use crate::domain::error::DispatchError;
use crate::domain::events::{DispatchEvent, EventDetail};
use crate::domain::request::{CsmsRequest, Encryption, RequestOptions};
use crate::domain::routing::{Egress, RoutingTable};
use crate::domain::signing::{SignaturePolicy, SignatureRule, SigningContext};
use crate::ports::channel::Channel;
use crate::registry::{ChannelRegistry, RegistryError, RegistryEvent, ShutdownReport};
use csms_bus::{AuditStream, EventNotifier, Phase};
use csms_crypto::{EncryptionContextStore, KeyRing, MessageSigner};
use csms_types::{
    Frame, FrameBody, MessageKind, PeerId, RequestId, SealedPayload, SignatureBlock,
};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for [`Csms`].
pub struct CsmsBuilder {
    config: CsmsConfig,
    channels: Vec<Arc<dyn Channel>>,
    ids: Arc<dyn RequestIdGenerator>,
    key_ring: Arc<KeyRing>,
    signer: Option<Arc<dyn MessageSigner>>,
    keys: Arc<EncryptionContextStore>,
    policy: Option<SignaturePolicy>,
}

impl CsmsBuilder {
    pub fn new(config: CsmsConfig) -> Self {
        Self {
            config,
            channels: Vec::new(),
            ids: Arc::new(UuidV7Generator),
            key_ring: Arc::new(KeyRing::new()),
            signer: None,
            keys: Arc::new(EncryptionContextStore::new()),
            policy: None,
        }
    }

    #[must_use]
    pub fn channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    #[must_use]
    pub fn id_generator(mut self, ids: Arc<dyn RequestIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Signer used instead of the built-in key ring.
    #[must_use]
    pub fn signer(mut self, signer: Arc<dyn MessageSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn key_ring(mut self, key_ring: Arc<KeyRing>) -> Self {
        self.key_ring = key_ring;
        self
    }

    #[must_use]
    pub fn encryption_contexts(mut self, keys: Arc<EncryptionContextStore>) -> Self {
        self.keys = keys;
        self
    }

    /// Initial policy; otherwise an empty one with the configured unsigned policy.
    #[must_use]
    pub fn signature_policy(mut self, policy: SignaturePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<Csms, ConfigError> {
        self.config.validate()?;

        let routing = RoutingTable::new();
        for route in &self.config.static_routes {
            routing.add_static_route(route.destination.clone(), route.next_hop.clone());
        }

        let policy = self
            .policy
            .unwrap_or_else(|| SignaturePolicy::new(self.config.unsigned_policy));
        let signer = self
            .signer
            .unwrap_or_else(|| Arc::clone(&self.key_ring) as Arc<dyn MessageSigner>);
        let (shutdown_tx, _) = watch::channel(false);

        let inner = CsmsInner {
            routing,
            keys: self.keys,
            key_ring: self.key_ring,
            signer,
            policy: RwLock::new(policy),
            correlator: Correlator::new(self.ids, self.config.completion_memory()),
            registry: ChannelRegistry::with_channels(self.channels, self.config.inbound_buffer),
            notifier: Arc::new(EventNotifier::with_budget(self.config.notifier_budget())),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
            config: self.config,
        };

        Ok(Csms {
            inner: Arc::new(inner),
        })
    }
}

struct CsmsInner {
    config: CsmsConfig,
    routing: RoutingTable,
    keys: Arc<EncryptionContextStore>,
    key_ring: Arc<KeyRing>,
    signer: Arc<dyn MessageSigner>,
    policy: RwLock<SignaturePolicy>,
    correlator: Correlator,
    registry: ChannelRegistry,
    notifier: Arc<EventNotifier<DispatchEvent>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutting_down: AtomicBool,
}

/// The dispatch core of one CSMS instance. Cheap to clone.
#[derive(Clone)]
pub struct Csms {
    inner: Arc<CsmsInner>,
}

impl Csms {
    pub fn builder(config: CsmsConfig) -> CsmsBuilder {
        CsmsBuilder::new(config)
    }

    // === LIFECYCLE ===

    /// Start every channel, the inbound loop and the overdue sweep.
    pub async fn start(&self) -> Result<(), RegistryError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(RegistryError::Stopped);
        }
        let events = self.inner.registry.start().await?;

        let inbound = tokio::spawn(inbound_loop(
            self.inner.config.local_id.clone(),
            self.inner.correlator.clone(),
            Arc::clone(&self.inner.notifier),
            events,
        ));
        let sweeper = spawn_sweeper(
            self.inner.correlator.clone(),
            self.inner.config.sweep_interval(),
            self.inner.shutdown_tx.subscribe(),
        );
        self.inner.tasks.lock().extend([inbound, sweeper]);

        info!(
            local_id = %self.inner.config.local_id,
            channels = self.inner.registry.channel_count(),
            routes = self.inner.routing.len(),
            "CSMS dispatch core started"
        );
        Ok(())
    }

    /// Stop dispatching.
    ///
    /// New sends fail with `ShuttingDown` from here on. With `wait`, pending
    /// requests get up to the configured grace period to complete; whatever
    /// is still pending afterwards fails with `ChannelUnavailable`.
    pub async fn shutdown(&self, reason: &str, wait: bool) -> ShutdownReport {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            debug!(reason, "CSMS shutdown already in progress");
            return ShutdownReport::default();
        }
        info!(reason, wait, "CSMS dispatch core shutting down");

        let report = self
            .inner
            .registry
            .shutdown(reason, wait, self.inner.config.shutdown_grace())
            .await;

        let failed = self
            .inner
            .correlator
            .fail_all(&format!("shutting down: {reason}"));

        // The sweeper exits on the signal; the inbound loop once its channels are gone.
        let _ = self.inner.shutdown_tx.send(true);
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        info!(
            drained = report.drained,
            failed,
            peers_closed = report.peers_closed,
            "CSMS dispatch core stopped"
        );
        report
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    // === DISPATCH ===

    /// Send a request and return a handle to its eventual response.
    pub async fn send<R: CsmsRequest>(
        &self,
        request: &R,
        options: RequestOptions,
    ) -> Result<PendingCall<R::Response>, DispatchError> {
        if self.is_shutting_down() {
            return Err(DispatchError::ShuttingDown);
        }

        let inner = &self.inner;
        let destination = request.destination().clone();
        let kind = R::KIND;

        let egress = inner.routing.resolve(&destination, &inner.registry)?;
        let signing = inner.policy.read().require(&kind, &destination)?;

        let mut payload =
            serde_json::to_value(request).map_err(|e| DispatchError::Encode(e.to_string()))?;
        if let Some(Encryption { key_slot }) = options.encrypt {
            payload = self.seal(&destination, key_slot, &payload)?;
        }

        let timeout = options.timeout.unwrap_or_else(|| inner.config.default_timeout());
        let registration = Registration::new(destination.clone(), kind.clone(), timeout)
            .via(egress.peer().clone())
            .with_request_id(options.request_id)
            .with_guard(inner.registry.track());
        let (request_id, waiter) = inner.correlator.try_register(registration)?;

        let mut frame = Frame::call(
            request_id.clone(),
            inner.config.local_id.clone(),
            destination.clone(),
            kind.clone(),
            payload.clone(),
        );
        if let Some(timestamp) = options.timestamp {
            frame.timestamp = timestamp;
        }
        if let Some(ctx) = &signing {
            match self.sign(&frame, ctx) {
                Ok(block) => frame.signature = Some(block),
                Err(e) => {
                    inner.correlator.discard(&request_id);
                    return Err(e);
                }
            }
        }

        inner
            .notifier
            .fire(
                Phase::BeforeSend,
                DispatchEvent {
                    request_id: request_id.clone(),
                    destination: destination.clone(),
                    kind: kind.clone(),
                    detail: EventDetail::Request {
                        payload,
                        encrypted: options.encrypt.is_some(),
                        signed: signing.is_some(),
                    },
                },
            )
            .await;

        if let Err(e) = inner.registry.send(&egress, frame).await {
            inner.correlator.discard(&request_id);
            return Err(e);
        }

        debug!(
            request_id = %request_id,
            destination = %destination,
            egress = %egress.peer(),
            kind = %kind,
            "Request sent"
        );

        Ok(PendingCall {
            waiter,
            destination,
            expected: kind,
            keys: Arc::clone(&inner.keys),
            _response: PhantomData,
        })
    }

    /// Send a request and wait for its typed response.
    pub async fn dispatch<R: CsmsRequest>(
        &self,
        request: &R,
        options: RequestOptions,
    ) -> Result<R::Response, DispatchError> {
        self.send(request, options).await?.response().await
    }

    fn seal(
        &self,
        destination: &PeerId,
        key_slot: Option<u16>,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        let plaintext =
            serde_json::to_vec(payload).map_err(|e| DispatchError::Encode(e.to_string()))?;
        let sealed = self.inner.keys.seal(destination, key_slot, &plaintext)?;
        Ok(sealed.to_value()?)
    }

    fn sign(&self, frame: &Frame, ctx: &SigningContext) -> Result<SignatureBlock, DispatchError> {
        let bytes = frame.signing_bytes()?;
        let signature = self.inner.signer.sign(&ctx.key_ref, ctx.algorithm, &bytes)?;
        Ok(SignatureBlock {
            key_ref: ctx.key_ref.clone(),
            algorithm: ctx.algorithm,
            signature: hex::encode(signature),
        })
    }

    // === ADMINISTRATION ===

    pub fn add_static_route(&self, destination: PeerId, next_hop: PeerId) -> Option<PeerId> {
        self.inner.routing.add_static_route(destination, next_hop)
    }

    pub fn remove_static_route(&self, destination: &PeerId, next_hop: &PeerId) -> bool {
        self.inner.routing.remove_static_route(destination, next_hop)
    }

    /// Where a request for `destination` would leave right now.
    pub fn resolve(&self, destination: &PeerId) -> Result<Egress, DispatchError> {
        self.inner.routing.resolve(destination, &self.inner.registry)
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.inner.routing
    }

    pub fn encryption_contexts(&self) -> &EncryptionContextStore {
        &self.inner.keys
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.inner.key_ring
    }

    /// Replace the signature policy. Requests already sent are unaffected.
    pub fn set_signature_policy(&self, policy: SignaturePolicy) {
        *self.inner.policy.write() = policy;
        info!("Signature policy replaced");
    }

    pub fn add_signature_rule(&self, rule: SignatureRule) {
        self.inner.policy.write().push(rule);
    }

    pub fn signing_context_for(
        &self,
        kind: &MessageKind,
        destination: &PeerId,
    ) -> Option<SigningContext> {
        self.inner.policy.read().signing_context_for(kind, destination)
    }

    /// Add a channel; started right away if the core is running.
    pub async fn register_channel(&self, channel: Arc<dyn Channel>) -> Result<(), RegistryError> {
        self.inner.registry.register(channel).await
    }

    pub fn notifier(&self) -> &EventNotifier<DispatchEvent> {
        &self.inner.notifier
    }

    /// Every notification for `kind` (or all kinds), for audit logging.
    pub fn audit_stream(&self, kind: Option<MessageKind>) -> AuditStream<DispatchEvent> {
        self.inner.notifier.stream(kind)
    }

    pub fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.inner.registry
    }

    pub fn local_id(&self) -> &PeerId {
        &self.inner.config.local_id
    }

    pub fn config(&self) -> &CsmsConfig {
        &self.inner.config
    }
}

/// A sent request awaiting its response.
///
/// Dropping it before the response arrives cancels the request.
pub struct PendingCall<T> {
    waiter: Waiter,
    destination: PeerId,
    expected: MessageKind,
    keys: Arc<EncryptionContextStore>,
    _response: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PendingCall<T> {
    pub fn request_id(&self) -> &RequestId {
        self.waiter.request_id()
    }

    pub fn destination(&self) -> &PeerId {
        &self.destination
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.waiter.cancel_handle()
    }

    /// Wait for the reply and decode it.
    pub async fn response(self) -> Result<T, DispatchError> {
        let Self {
            waiter,
            destination,
            expected,
            keys,
            ..
        } = self;

        let reply = waiter.wait().await?;
        if let Some(actual) = reply.action {
            if actual != expected {
                return Err(DispatchError::UnexpectedResponse { expected, actual });
            }
        }

        let payload = match SealedPayload::from_value(&reply.payload)? {
            Some(sealed) => {
                let plaintext = keys.open(&destination, &sealed)?;
                serde_json::from_slice(&plaintext)
                    .map_err(|e| DispatchError::Decode(e.to_string()))?
            }
            None => reply.payload,
        };

        serde_json::from_value(payload).map_err(|e| DispatchError::Decode(e.to_string()))
    }
}

async fn inbound_loop(
    local_id: PeerId,
    correlator: Correlator,
    notifier: Arc<EventNotifier<DispatchEvent>>,
    mut events: mpsc::Receiver<RegistryEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RegistryEvent::Frame { peer, frame, .. } => {
                handle_frame(&local_id, &correlator, &notifier, &peer, frame);
            }
            RegistryEvent::PeerLost { peer, channel } => {
                let reason = format!("connection lost on channel {channel}");
                correlator.fail_via(&peer, &reason);
            }
        }
    }
    debug!("Inbound loop stopped");
}

/// Settle the pending request a reply answers.
///
/// Only the peer the request left through may settle it. AfterReceive
/// handlers run off the inbound loop so a slow handler never holds up the
/// next reply.
fn handle_frame(
    local_id: &PeerId,
    correlator: &Correlator,
    notifier: &Arc<EventNotifier<DispatchEvent>>,
    peer: &PeerId,
    frame: Frame,
) {
    if &frame.destination != local_id {
        warn!(
            peer = %peer,
            destination = %frame.destination,
            request_id = %frame.request_id,
            "Dropping frame addressed to another peer"
        );
        return;
    }

    let request_id = frame.request_id;
    let (completion, detail) = match frame.body {
        FrameBody::Call { action, .. } => {
            warn!(peer = %peer, request_id = %request_id, action = %action, "Dropping inbound call");
            return;
        }
        FrameBody::CallResult { action, payload } => (
            Ok(Reply {
                action,
                payload: payload.clone(),
            }),
            EventDetail::Response { payload },
        ),
        FrameBody::CallError {
            code,
            description,
            details,
        } => (
            Err(DispatchError::CallError {
                code,
                description: description.clone(),
                details,
            }),
            EventDetail::Error { code, description },
        ),
    };

    match correlator.complete(peer, &request_id, completion) {
        Ok(done) => {
            let event = DispatchEvent {
                request_id,
                destination: done.destination,
                kind: done.response_kind,
                detail,
            };
            let notifier = Arc::clone(notifier);
            tokio::spawn(async move {
                notifier.fire(Phase::AfterReceive, event).await;
            });
        }
        Err(e) => warn!(peer = %peer, error = %e, "Discarding reply"),
    }
}
