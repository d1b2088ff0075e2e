//! # CSMS Dispatch Test Suite
//!
//! Cross-crate scenarios exercising the dispatch core end to end over
//! in-process channels.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Running core + simulated stations
//! └── integration/
//!     ├── scenarios.rs  # Routing, correlation and counter scenarios
//!     ├── lifecycle.rs  # Shutdown drain, rehoming, connection loss
//!     └── security.rs   # Signing policy and payload sealing
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p csms-tests
//! cargo test -p csms-tests integration::lifecycle::
//! cargo bench -p csms-tests
//! ```

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod harness;
