//! # Adapters Layer
//!
//! - `pending`: the correlator and its sweep task
//! - `completions`: memory of recently completed request ids
//! - `memory`: in-process [`Channel`](crate::ports::Channel) implementation

pub mod completions;
pub mod memory;
pub mod pending;

pub use completions::RecentCompletions;
pub use memory::{MemoryChannel, RemotePeer};
pub use pending::{
    spawn_sweeper, CancelHandle, CompletedRequest, Completion, Correlator, CorrelatorStats,
    PendingRequestInfo, Registration, Reply, Waiter,
};
