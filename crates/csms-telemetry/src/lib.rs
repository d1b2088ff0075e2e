//! # CSMS Telemetry
//!
//! Structured logging for the dispatch core, built on `tracing-subscriber`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use csms_telemetry::{init_tracing, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_tracing(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CSMS_LOG_LEVEL` / `RUST_LOG` | `info` | Filter directive |
//! | `CSMS_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `CSMS_SERVICE_NAME` | `csms` | Service name |
//! | `CSMS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

#![allow(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use tracing_setup::{env_filter, init_tracing};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("Invalid configuration: {0}")]
    Config(String),
}
