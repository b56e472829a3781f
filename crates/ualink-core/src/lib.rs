// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink-core
//!
//! Core abstractions and shared types for the ualink telemetry gateway.
//!
//! This crate provides the pieces every other ualink crate builds on:
//!
//! - **Error**: the gateway error taxonomy
//! - **Types**: endpoints, publish requests, points and message records
//! - **Value**: source values, status codes and timestamps
//! - **Context**: the explicit context object carrying settings, counters,
//!   metrics registry and shutdown token
//! - **Diagnostics**: gateway-wide counters and rolling averages
//! - **Queue**: the bounded, fail-fast record queue
//! - **Broker / Command**: the seams towards broker clients and the command
//!   processor
//!
//! ## Example
//!
//! ```rust
//! use ualink_core::context::{GatewayContext, GatewaySettings};
//! use ualink_core::queue::record_queue;
//!
//! let ctx = GatewayContext::new(GatewaySettings::default());
//! let (sender, _receiver) = record_queue(
//!     ctx.settings().queue_capacity,
//!     ctx.diagnostics().clone(),
//! );
//! assert_eq!(sender.capacity(), 1000);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod types;
pub mod value;

// =============================================================================
// Runtime Modules
// =============================================================================

pub mod context;
pub mod diagnostics;
pub mod queue;

// =============================================================================
// Seams
// =============================================================================

pub mod broker;
pub mod command;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use broker::{BrokerClient, InboundMessage};
pub use command::{CommandHandler, CommandKind, CommandOutcome};
pub use context::{GatewayContext, GatewaySettings};
pub use diagnostics::{DiagnosticCounters, DiagnosticsInfo, RollingAverage};
pub use error::{GatewayError, GatewayResult};
pub use queue::{record_queue, RecordReceiver, RecordSender};
pub use types::{
    endpoint_key, writer_id, AuthMode, Credentials, EventField, EventFilterClause, MessageRecord,
    OpcEventEntry, OpcNodeEntry, PointSpec, PublishNodesRequest, RecordPayload, SourceEndpoint,
};
pub use value::{DataValue, StatusCode, Variant};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
