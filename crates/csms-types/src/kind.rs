//! # Message Kinds
//!
//! The protocol has roughly forty request/response pairs. Rather than one enum
//! variant per operation, a `MessageKind` is an action name that operation
//! adapters declare as a constant.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Action name of a protocol message (e.g. `"Reset"`, `"UpdateFirmware"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKind(Cow<'static, str>);

impl MessageKind {
    /// Declare a kind from a static action name. Usable in `const` position.
    pub const fn from_static(action: &'static str) -> Self {
        Self(Cow::Borrowed(action))
    }

    /// Create a kind from a runtime action name (e.g. parsed from a frame).
    pub fn new(action: impl Into<String>) -> Self {
        Self(Cow::Owned(action.into()))
    }

    /// The action name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for MessageKind {
    fn from(action: &'static str) -> Self {
        Self::from_static(action)
    }
}
