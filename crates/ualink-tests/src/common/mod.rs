// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Common Test Utilities
//!
//! - `fixtures`: simulated plant servers, records and configuration files
//! - `builders`: PublishNodes requests and command messages
//! - `assertions`: frame decoding and eventual-consistency helpers
//! - `mocks`: fake encoder and recording/failing publishers
//! - `harness`: an in-process gateway wired end to end

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use assertions::*;
pub use builders::*;
pub use fixtures::*;
pub use harness::*;
pub use mocks::*;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: quiet dependencies, verbose gateway.
const TEST_LOG_FILTER: &str = "warn,ualink_opcua=debug,ualink_buffer=debug,ualink_broker=debug";

/// Routes gateway logs into the test output. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(TEST_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Creates a scratch directory for point-set files and spill stores.
pub fn temp_test_dir(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("scratch directory")
}
