//! Dispatch core configuration with validation.

use crate::domain::routing::RoutingEntry;
use crate::domain::signing::UnsignedPolicy;
use csms_types::PeerId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration of one CSMS instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsmsConfig {
    /// Our own peer id, stamped as the origin of every frame.
    pub local_id: PeerId,
    /// Deadline applied when a request carries no timeout.
    pub default_timeout_ms: u64,
    /// Period of the overdue-request sweep.
    pub sweep_interval_ms: u64,
    /// Maximum wait for in-flight work on `shutdown(wait = true)`.
    pub shutdown_grace_ms: u64,
    /// Maximum time a notification may hold up dispatch.
    pub notifier_budget_ms: u64,
    /// Behaviour when no signature rule matches.
    pub unsigned_policy: UnsignedPolicy,
    /// How long completed request ids are remembered.
    pub completion_memory_secs: u64,
    /// Capacity of the inbound event queue.
    pub inbound_buffer: usize,
    /// Routes installed at construction.
    pub static_routes: Vec<RoutingEntry>,
}

impl Default for CsmsConfig {
    fn default() -> Self {
        Self {
            local_id: PeerId::new("csms"),
            default_timeout_ms: 30_000,
            sweep_interval_ms: 1_000,
            shutdown_grace_ms: 10_000,
            notifier_budget_ms: 250,
            unsigned_policy: UnsignedPolicy::Allow,
            completion_memory_secs: 120,
            inbound_buffer: 1_024,
            static_routes: Vec::new(),
        }
    }
}

impl CsmsConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_id.as_str().is_empty() {
            return Err(ConfigError::InvalidValue("local_id cannot be empty".into()));
        }

        for (name, value) in [
            ("default_timeout_ms", self.default_timeout_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("shutdown_grace_ms", self.shutdown_grace_ms),
            ("notifier_budget_ms", self.notifier_budget_ms),
            ("completion_memory_secs", self.completion_memory_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{name} cannot be 0")));
            }
        }

        if self.inbound_buffer == 0 {
            return Err(ConfigError::InvalidValue("inbound_buffer cannot be 0".into()));
        }

        if let Some(route) = self
            .static_routes
            .iter()
            .find(|r| r.destination == r.next_hop)
        {
            return Err(ConfigError::InvalidRoute(format!(
                "{} cannot be its own next hop",
                route.destination
            )));
        }

        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn notifier_budget(&self) -> Duration {
        Duration::from_millis(self.notifier_budget_ms)
    }

    pub fn completion_memory(&self) -> Duration {
        Duration::from_secs(self.completion_memory_secs)
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid static route: {0}")]
    InvalidRoute(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration: {0}")]
    Io(String),
}
