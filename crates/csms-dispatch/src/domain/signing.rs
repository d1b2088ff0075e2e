//! Signature Policy
//!
//! Ordered rules deciding which outgoing messages get signed and with what.
//! Rules are evaluated in declaration order and the first match wins.

use crate::domain::error::DispatchError;
use csms_types::{AlgorithmId, KeyRef, MessageKind, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&MessageKind, &PeerId) -> bool + Send + Sync>;

/// Predicate over (message kind, destination).
#[derive(Clone)]
pub enum MessageMatcher {
    /// Every message.
    Any,
    /// Messages of any of these kinds.
    Kinds(HashSet<MessageKind>),
    /// Messages to any of these destinations.
    Destinations(HashSet<PeerId>),
    /// Both matchers must match.
    All(Vec<MessageMatcher>),
    /// Arbitrary predicate.
    Custom(Predicate),
}

impl MessageMatcher {
    pub fn kinds(kinds: impl IntoIterator<Item = MessageKind>) -> Self {
        Self::Kinds(kinds.into_iter().collect())
    }

    pub fn destinations(peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self::Destinations(peers.into_iter().collect())
    }

    pub fn custom(f: impl Fn(&MessageKind, &PeerId) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Combine with another matcher; both must match.
    pub fn and(self, other: MessageMatcher) -> Self {
        match self {
            Self::All(mut list) => {
                list.push(other);
                Self::All(list)
            }
            first => Self::All(vec![first, other]),
        }
    }

    pub fn matches(&self, kind: &MessageKind, destination: &PeerId) -> bool {
        match self {
            Self::Any => true,
            Self::Kinds(kinds) => kinds.contains(kind),
            Self::Destinations(peers) => peers.contains(destination),
            Self::All(list) => list.iter().all(|m| m.matches(kind, destination)),
            Self::Custom(f) => f(kind, destination),
        }
    }
}

impl fmt::Debug for MessageMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            Self::Destinations(peers) => f.debug_tuple("Destinations").field(peers).finish(),
            Self::All(list) => f.debug_tuple("All").field(list).finish(),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// Key and algorithm to sign a message with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub key_ref: KeyRef,
    pub algorithm: AlgorithmId,
}

/// One policy rule.
#[derive(Debug, Clone)]
pub struct SignatureRule {
    pub matcher: MessageMatcher,
    pub key_ref: KeyRef,
    pub algorithm: AlgorithmId,
}

impl SignatureRule {
    pub fn new(matcher: MessageMatcher, key_ref: KeyRef, algorithm: AlgorithmId) -> Self {
        Self {
            matcher,
            key_ref,
            algorithm,
        }
    }
}

/// What to do when no rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsignedPolicy {
    /// Send the message unsigned.
    #[default]
    Allow,
    /// Fail the send with `SignaturePolicyViolation`.
    Reject,
}

/// Ordered signature rules plus the fallback for unmatched messages.
#[derive(Debug, Clone, Default)]
pub struct SignaturePolicy {
    rules: Vec<SignatureRule>,
    unsigned: UnsignedPolicy,
}

impl SignaturePolicy {
    pub fn new(unsigned: UnsignedPolicy) -> Self {
        Self {
            rules: Vec::new(),
            unsigned,
        }
    }

    /// Builder-style rule append.
    #[must_use]
    pub fn with_rule(mut self, rule: SignatureRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append a rule; it is evaluated after every existing rule.
    pub fn push(&mut self, rule: SignatureRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[SignatureRule] {
        &self.rules
    }

    pub fn unsigned_policy(&self) -> UnsignedPolicy {
        self.unsigned
    }

    pub fn set_unsigned_policy(&mut self, unsigned: UnsignedPolicy) {
        self.unsigned = unsigned;
    }

    /// First matching rule's signing context.
    pub fn signing_context_for(
        &self,
        kind: &MessageKind,
        destination: &PeerId,
    ) -> Option<SigningContext> {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(kind, destination))
            .map(|rule| SigningContext {
                key_ref: rule.key_ref.clone(),
                algorithm: rule.algorithm,
            })
    }

    /// Like [`Self::signing_context_for`], applying the unsigned policy on a miss.
    pub fn require(
        &self,
        kind: &MessageKind,
        destination: &PeerId,
    ) -> Result<Option<SigningContext>, DispatchError> {
        match self.signing_context_for(kind, destination) {
            Some(ctx) => Ok(Some(ctx)),
            None if self.unsigned == UnsignedPolicy::Allow => Ok(None),
            None => Err(DispatchError::SignaturePolicyViolation {
                kind: kind.clone(),
                destination: destination.clone(),
            }),
        }
    }
}
