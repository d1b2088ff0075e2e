//! Routing Table
//!
//! Static one-hop routes from a destination station to the hub that relays
//! for it, consulted only when the destination has no direct channel binding.
//!
//! # Invariants
//!
//! - At most one next hop per destination; re-adding overwrites.
//! - Removal is keyed by (destination, next hop). Removing a pair that is not
//!   present is a no-op and never touches a newer route for the destination.
//! - No transitive chaining: the hub does its own relaying.

use crate::domain::error::DispatchError;
use csms_types::PeerId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Answers whether a peer currently has a live direct binding.
pub trait DirectBindings {
    fn is_directly_bound(&self, peer: &PeerId) -> bool;
}

/// Where a frame for some destination should be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Egress {
    /// The destination is connected to us directly.
    Direct(PeerId),
    /// The destination is reached through a relaying hub.
    ViaHub { hub: PeerId, destination: PeerId },
}

impl Egress {
    /// Peer the frame is physically sent to.
    pub fn peer(&self) -> &PeerId {
        match self {
            Self::Direct(peer) => peer,
            Self::ViaHub { hub, .. } => hub,
        }
    }

    /// Final addressee.
    pub fn destination(&self) -> &PeerId {
        match self {
            Self::Direct(peer) => peer,
            Self::ViaHub { destination, .. } => destination,
        }
    }
}

/// A configured static route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub destination: PeerId,
    pub next_hop: PeerId,
}

/// Static routes owned by one CSMS instance.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: DashMap<PeerId, PeerId>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route, replacing any previous next hop. Returns the replaced hop.
    pub fn add_static_route(&self, destination: PeerId, next_hop: PeerId) -> Option<PeerId> {
        info!(destination = %destination, next_hop = %next_hop, "Static route added");
        self.routes.insert(destination, next_hop)
    }

    /// Remove the route `destination -> next_hop` if that exact pair is present.
    pub fn remove_static_route(&self, destination: &PeerId, next_hop: &PeerId) -> bool {
        let removed = self
            .routes
            .remove_if(destination, |_, hop| hop == next_hop)
            .is_some();
        if removed {
            info!(destination = %destination, next_hop = %next_hop, "Static route removed");
        } else {
            debug!(destination = %destination, next_hop = %next_hop, "No matching static route to remove");
        }
        removed
    }

    /// Next hop configured for `destination`, if any.
    pub fn static_route(&self, destination: &PeerId) -> Option<PeerId> {
        self.routes.get(destination).map(|hop| hop.value().clone())
    }

    /// Resolve the egress for `destination`. A direct binding wins over a route.
    pub fn resolve(
        &self,
        destination: &PeerId,
        bindings: &impl DirectBindings,
    ) -> Result<Egress, DispatchError> {
        if bindings.is_directly_bound(destination) {
            return Ok(Egress::Direct(destination.clone()));
        }

        match self.static_route(destination) {
            Some(hub) => Ok(Egress::ViaHub {
                hub,
                destination: destination.clone(),
            }),
            None => Err(DispatchError::NoRouteFound {
                destination: destination.clone(),
            }),
        }
    }

    /// Snapshot of all routes, sorted by destination.
    pub fn routes(&self) -> Vec<RoutingEntry> {
        let mut routes: Vec<_> = self
            .routes
            .iter()
            .map(|e| RoutingEntry {
                destination: e.key().clone(),
                next_hop: e.value().clone(),
            })
            .collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
