// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Source backend abstraction.
//!
//! The connection manager talks to OPC UA servers only through these two
//! traits, so the simulated backend and the live client stack are
//! interchangeable.
//!
//! A [`SourceSession`] must deliver notifications by calling the
//! [`NotificationSink`] registered with each monitored item. Sinks never
//! block, so backends may call them from their own threads.

use std::sync::Arc;

use async_trait::async_trait;

use ualink_core::{DataValue, EventFilterClause, GatewayResult, SourceEndpoint};

use crate::node_id::NodeId;
use crate::router::NotificationSink;

/// Monitored item request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRequest {
    /// Resolved node to monitor.
    pub node_id: NodeId,
    /// Sampling interval in milliseconds.
    pub sampling_interval_ms: u32,
    /// Event filter; `Some` monitors events of the node instead of its value.
    pub event_filter: Option<Vec<EventFilterClause>>,
}

impl MonitorRequest {
    /// Returns `true` for event monitoring.
    pub fn is_event(&self) -> bool {
        self.event_filter.is_some()
    }
}

/// Opens sessions to source servers.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Opens a session to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the server is unreachable or refuses
    /// the session.
    async fn connect(&self, endpoint: &SourceEndpoint) -> GatewayResult<Arc<dyn SourceSession>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// An open session to one server.
#[async_trait]
pub trait SourceSession: Send + Sync {
    /// Application URI the server reported.
    fn application_uri(&self) -> String;

    /// Namespace table of the server.
    fn namespace_array(&self) -> Vec<String>;

    /// Reads the current value of a node.
    async fn read_value(&self, node: &NodeId) -> GatewayResult<DataValue>;

    /// Reads the display name of a node.
    ///
    /// # Errors
    ///
    /// Returns a resolution error if the node does not exist.
    async fn read_display_name(&self, node: &NodeId) -> GatewayResult<String>;

    /// Creates a subscription and returns its id.
    async fn create_subscription(&self, publishing_interval_ms: u32) -> GatewayResult<u32>;

    /// Deletes a subscription with all its monitored items.
    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()>;

    /// Creates a monitored item delivering to `sink` and returns its id.
    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: MonitorRequest,
        sink: NotificationSink,
    ) -> GatewayResult<u32>;

    /// Deletes a monitored item.
    async fn delete_monitored_item(&self, subscription_id: u32, item_id: u32) -> GatewayResult<()>;

    /// Probes the server. Returns `false` if the keep-alive was missed.
    async fn check_keep_alive(&self) -> bool;

    /// Re-establishes the session, keeping its subscriptions.
    async fn reconnect(&self) -> GatewayResult<()>;

    /// Closes the session.
    async fn close(&self) -> GatewayResult<()>;
}
