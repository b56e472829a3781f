// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink-opcua
//!
//! OPC UA source side of the ualink gateway.
//!
//! - [`ConnectionManager`]: session pool with publish, unpublish and list
//!   operations, keep-alive handling and reconnects.
//! - [`NotificationRouter`]: turns data changes and events into queued
//!   records without blocking the backend.
//! - [`HeartbeatScheduler`]: periodic re-reads of slow-changing points.
//! - [`PointSetStore`]: write-through persistence of the published set.
//!
//! Servers are reached through a [`SourceConnector`]. The crate ships a
//! [`SimulatedConnector`] for development and tests; the live client
//! stack is behind the `real-source` feature.
//!
//! ```text
//! SourceSession ──► NotificationSink ──► NotificationRouter ──► RecordSender
//!       ▲                                                          ▲
//! ConnectionManager ──► HeartbeatScheduler ────────────────────────┘
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod heartbeat;
pub mod keepalive;
pub mod manager;
pub mod node_id;
pub mod persistence;
#[cfg(feature = "real-source")]
pub mod real_source;
pub mod router;
pub mod session;
pub mod simulated;
pub mod source;

pub use heartbeat::HeartbeatScheduler;
pub use keepalive::KeepAliveMonitor;
pub use manager::{
    ConnectionManager, KeepAliveOutcome, ManagerConfig, PublishedPoint, UnpublishOutcome,
};
pub use node_id::{ExpandedNodeId, NamespaceRef, NodeId, NodeIdError, NodeIdentifier};
pub use persistence::PointSetStore;
#[cfg(feature = "real-source")]
pub use real_source::{OpcUaConnector, RealSourceConfig};
pub use router::{NotificationRouter, NotificationSink, PointBinding, RouteOutcome};
pub use session::{SessionId, SessionState};
pub use simulated::{SimulatedConnector, SimulatedServer};
pub use source::{MonitorRequest, SourceConnector, SourceSession};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
