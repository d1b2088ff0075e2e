//! Domain types for the dispatch core.
//!
//! Pure state and rules: routing, signing policy, configuration, errors and
//! the typed request abstraction. Async machinery lives in `adapters`.

pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod request;
pub mod routing;
pub mod signing;

pub use config::{ConfigError, CsmsConfig};
pub use correlation::{RequestIdGenerator, SequentialGenerator, UuidV7Generator};
pub use error::{CorrelationError, DispatchError, DispatchResult};
pub use events::{DispatchEvent, EventDetail};
pub use request::{CsmsRequest, Encryption, RequestOptions};
pub use routing::{DirectBindings, Egress, RoutingEntry, RoutingTable};
pub use signing::{
    MessageMatcher, SignaturePolicy, SignatureRule, SigningContext, UnsignedPolicy,
};
