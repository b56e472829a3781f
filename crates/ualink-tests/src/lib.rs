// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink Integration Tests
//!
//! Integration tests for the ualink gateway and the utilities they share.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: Pre-built servers, settings and records
//!   - `builders`: Builders for records, requests and commands
//!   - `assertions`: Frame and response assertion helpers
//!   - `mocks`: Recording publisher, fake encoder, flaky connector
//!   - `harness`: A fully wired in-process gateway
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ualink-tests
//!
//! cargo test -p ualink-tests --test integration_pipeline
//! cargo test -p ualink-tests --test integration_connection
//! cargo test -p ualink-tests --test integration_command
//! cargo test -p ualink-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! ### Pipeline Tests (`integration_pipeline.rs`)
//! - Frame assembly, size budget and send interval
//! - Backpressure on the record queue
//! - Store-and-forward spill and replay
//! - Source value change to broker frame
//!
//! ### Connection Tests (`integration_connection.rs`)
//! - Session and subscription deduplication
//! - Replace semantics on republish
//! - Keep-alive driven reconnects
//! - Point-set persistence
//!
//! ### Command Tests (`integration_command.rs`)
//! - Command routing and response topics
//! - Staleness and malformed payloads
//! - Per-entry status lines
//!
//! ### Config Tests (`integration_config.rs`)
//! - File formats, placeholders and overrides
//! - Mapping onto gateway settings
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use ualink_tests::common::harness::GatewayHarness;
//! use ualink_tests::common::builders::CommandBuilder;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = GatewayHarness::start().await;
//!     harness.send(CommandBuilder::get_info().build()).await;
//!     // ... assertions on harness.broker.responses()
//!     harness.stop().await;
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::builders::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
}
