// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink-bin
//!
//! CLI binary for the ualink OPC UA telemetry gateway.
//!
//! This crate provides the main binary entry point, including:
//!
//! - CLI argument parsing with clap
//! - Gateway runtime orchestration
//! - Periodic diagnostics reporting
//! - Graceful shutdown handling
//! - Logging initialization
//!
//! ## Architecture
//!
//! ```text
//!                      main.rs
//!                         │
//!                      cli.rs
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!      commands        runtime        logging
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!      shutdown      diagnostics     ualink-*
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the gateway (default command)
//! ualink
//!
//! # Start with a custom config
//! ualink -c /etc/ualink/ualink.yaml
//!
//! # Try it without a broker or OPC UA server
//! ualink run --dev
//!
//! # Validate configuration
//! ualink validate --show
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use diagnostics::DiagnosticsReporter;
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{GatewayRuntime, RuntimeBuilder};
pub use shutdown::ShutdownCoordinator;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
