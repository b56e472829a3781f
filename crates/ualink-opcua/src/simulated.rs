// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process simulated OPC UA servers.
//!
//! Used by the `simulated` source backend in development mode and by the
//! test suites. A [`SimulatedServer`] holds a node table and a namespace
//! table, delivers data changes and events to monitored items, and lets
//! tests toggle its health to drive keep-alive and reconnect paths.
//!
//! Like a real server, creating a monitored item on a variable reports the
//! current value once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ualink_core::{
    endpoint_key, Credentials, DataValue, EventField, GatewayError, GatewayResult, SourceEndpoint,
    StatusCode, Variant,
};

use crate::node_id::NodeId;
use crate::router::NotificationSink;
use crate::source::{MonitorRequest, SourceConnector, SourceSession};

/// Standard OPC UA namespace URI (index 0).
pub const OPC_UA_NAMESPACE: &str = "http://opcfoundation.org/UA/";

/// Endpoint of the development server.
pub const DEMO_ENDPOINT: &str = "opc.tcp://localhost:50000";

/// Namespace of the development server's variables.
pub const DEMO_NAMESPACE: &str = "http://ualink.dev/demo";

// =============================================================================
// SimulatedServer
// =============================================================================

struct SimulatedNode {
    display_name: String,
    value: DataValue,
}

struct SimulatedItem {
    node_id: NodeId,
    event_types: Option<Vec<String>>,
    sink: NotificationSink,
}

#[derive(Default)]
struct SimulatedSubscription {
    items: HashMap<u32, SimulatedItem>,
}

/// A simulated OPC UA server.
pub struct SimulatedServer {
    endpoint_url: String,
    application_uri: String,
    namespaces: RwLock<Vec<String>>,
    nodes: RwLock<HashMap<NodeId, SimulatedNode>>,
    subscriptions: Mutex<HashMap<u32, SimulatedSubscription>>,
    required_credentials: RwLock<Option<Credentials>>,
    next_subscription_id: AtomicU32,
    next_item_id: AtomicU32,
    max_subscriptions: AtomicUsize,
    healthy: AtomicBool,
    connects: AtomicU64,
    reconnect_attempts: AtomicU64,
    closed_sessions: AtomicU64,
}

impl SimulatedServer {
    /// Creates a server with the standard namespace and the application URI
    /// as namespace 1.
    pub fn new(endpoint_url: impl Into<String>, application_uri: impl Into<String>) -> Self {
        let application_uri = application_uri.into();
        let mut nodes = HashMap::new();
        nodes.insert(
            NodeId::SERVER,
            SimulatedNode {
                display_name: "Server".to_string(),
                value: DataValue::default(),
            },
        );

        Self {
            endpoint_url: endpoint_url.into(),
            namespaces: RwLock::new(vec![OPC_UA_NAMESPACE.to_string(), application_uri.clone()]),
            application_uri,
            nodes: RwLock::new(nodes),
            subscriptions: Mutex::new(HashMap::new()),
            required_credentials: RwLock::new(None),
            next_subscription_id: AtomicU32::new(1),
            next_item_id: AtomicU32::new(1),
            max_subscriptions: AtomicUsize::new(usize::MAX),
            healthy: AtomicBool::new(true),
            connects: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            closed_sessions: AtomicU64::new(0),
        }
    }

    /// Appends a namespace and returns its index.
    pub fn add_namespace(&self, uri: impl Into<String>) -> u16 {
        let mut namespaces = self.namespaces.write();
        namespaces.push(uri.into());
        (namespaces.len() - 1) as u16
    }

    /// Adds or replaces a variable.
    pub fn add_variable(&self, node_id: NodeId, display_name: impl Into<String>, value: Variant) {
        self.nodes.write().insert(
            node_id,
            SimulatedNode {
                display_name: display_name.into(),
                value: stamped(value, StatusCode::GOOD),
            },
        );
    }

    /// Caps the number of live subscriptions; creating one more fails with
    /// `BadTooManySubscriptions`.
    pub fn set_max_subscriptions(&self, limit: usize) {
        self.max_subscriptions.store(limit, Ordering::SeqCst);
    }

    /// Requires user name authentication with these credentials.
    pub fn require_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        *self.required_credentials.write() = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
    }

    /// Changes a variable's value and notifies its monitored items.
    pub fn set_value(&self, node_id: &NodeId, value: Variant) {
        self.update(node_id, stamped(value, StatusCode::GOOD));
    }

    /// Changes a variable's status and notifies its monitored items.
    pub fn set_status(&self, node_id: &NodeId, status: StatusCode) {
        self.update(node_id, stamped(Variant::Null, status));
    }

    fn update(&self, node_id: &NodeId, value: DataValue) {
        {
            let mut nodes = self.nodes.write();
            match nodes.get_mut(node_id) {
                Some(node) => node.value = value.clone(),
                None => return,
            }
        }

        for sink in self.sinks(|item| item.event_types.is_none() && &item.node_id == node_id) {
            sink.data_change(value.clone());
        }
    }

    /// Raises an event on a notifier node.
    ///
    /// Items with an `ofType` filter only receive events whose `EventType`
    /// field names one of the filtered types.
    pub fn emit_event(&self, notifier: &NodeId, fields: Vec<EventField>) {
        let event_type = fields
            .iter()
            .find(|f| f.name == "EventType")
            .map(|f| f.value.to_string());

        let sinks = self.sinks(|item| match &item.event_types {
            Some(types) if &item.node_id == notifier => {
                types.is_empty() || event_type.as_ref().is_some_and(|t| types.contains(t))
            }
            _ => false,
        });
        for sink in sinks {
            sink.event(fields.clone());
        }
    }

    fn sinks(&self, filter: impl Fn(&SimulatedItem) -> bool) -> Vec<NotificationSink> {
        self.subscriptions
            .lock()
            .values()
            .flat_map(|sub| sub.items.values())
            .filter(|item| filter(item))
            .map(|item| item.sink.clone())
            .collect()
    }

    /// Makes the server answer (or stop answering) requests.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Returns `true` if the server answers requests.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Returns the endpoint URL.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Returns the application URI.
    pub fn application_uri(&self) -> &str {
        &self.application_uri
    }

    /// Number of sessions opened.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of reconnect attempts.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Number of sessions closed.
    pub fn closed_sessions(&self) -> u64 {
        self.closed_sessions.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Number of live monitored items.
    pub fn monitored_item_count(&self) -> usize {
        self.subscriptions.lock().values().map(|s| s.items.len()).sum()
    }

    /// Ids of the variables the server holds.
    pub fn variables(&self) -> Vec<NodeId> {
        self.nodes
            .read()
            .keys()
            .filter(|id| **id != NodeId::SERVER)
            .cloned()
            .collect()
    }

    fn ensure_healthy(&self) -> GatewayResult<()> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(GatewayError::connection(&self.endpoint_url, "server not responding"))
        }
    }
}

fn stamped(value: Variant, status: StatusCode) -> DataValue {
    let now = Utc::now();
    DataValue {
        value,
        status,
        source_timestamp: Some(now),
        server_timestamp: Some(now),
    }
}

impl std::fmt::Debug for SimulatedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedServer")
            .field("endpoint_url", &self.endpoint_url)
            .field("application_uri", &self.application_uri)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

// =============================================================================
// SimulatedSession
// =============================================================================

struct SimulatedSession {
    server: Arc<SimulatedServer>,
    owned: Mutex<HashSet<u32>>,
    closed: AtomicBool,
}

impl SimulatedSession {
    fn ensure_open(&self) -> GatewayResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::connection(&self.server.endpoint_url, "session closed"));
        }
        self.server.ensure_healthy()
    }
}

#[async_trait]
impl SourceSession for SimulatedSession {
    fn application_uri(&self) -> String {
        self.server.application_uri.clone()
    }

    fn namespace_array(&self) -> Vec<String> {
        self.server.namespaces.read().clone()
    }

    async fn read_value(&self, node: &NodeId) -> GatewayResult<DataValue> {
        self.ensure_open()?;
        self.server
            .nodes
            .read()
            .get(node)
            .map(|n| n.value.clone())
            .ok_or_else(|| {
                GatewayError::resolution(&self.server.endpoint_url, node.to_string(), "BadNodeIdUnknown")
            })
    }

    async fn read_display_name(&self, node: &NodeId) -> GatewayResult<String> {
        self.ensure_open()?;
        self.server
            .nodes
            .read()
            .get(node)
            .map(|n| n.display_name.clone())
            .ok_or_else(|| {
                GatewayError::resolution(&self.server.endpoint_url, node.to_string(), "BadNodeIdUnknown")
            })
    }

    async fn create_subscription(&self, _publishing_interval_ms: u32) -> GatewayResult<u32> {
        self.ensure_open()?;
        let mut subscriptions = self.server.subscriptions.lock();
        if subscriptions.len() >= self.server.max_subscriptions.load(Ordering::SeqCst) {
            return Err(GatewayError::transport("BadTooManySubscriptions"));
        }
        let id = self.server.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        subscriptions.insert(id, SimulatedSubscription::default());
        drop(subscriptions);
        self.owned.lock().insert(id);
        Ok(id)
    }

    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()> {
        self.owned.lock().remove(&subscription_id);
        self.server.subscriptions.lock().remove(&subscription_id);
        Ok(())
    }

    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: MonitorRequest,
        sink: NotificationSink,
    ) -> GatewayResult<u32> {
        self.ensure_open()?;
        let initial = {
            let nodes = self.server.nodes.read();
            let node = nodes.get(&request.node_id).ok_or_else(|| {
                GatewayError::resolution(
                    &self.server.endpoint_url,
                    request.node_id.to_string(),
                    "BadNodeIdUnknown",
                )
            })?;
            (!request.is_event()).then(|| node.value.clone())
        };

        let item_id = self.server.next_item_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut subscriptions = self.server.subscriptions.lock();
            let subscription = subscriptions.get_mut(&subscription_id).ok_or_else(|| {
                GatewayError::transport(format!("subscription {} not found", subscription_id))
            })?;
            subscription.items.insert(
                item_id,
                SimulatedItem {
                    node_id: request.node_id,
                    event_types: request
                        .event_filter
                        .map(|filter| filter.into_iter().map(|clause| clause.of_type).collect()),
                    sink: sink.clone(),
                },
            );
        }

        if let Some(value) = initial {
            sink.data_change(value);
        }
        Ok(item_id)
    }

    async fn delete_monitored_item(&self, subscription_id: u32, item_id: u32) -> GatewayResult<()> {
        if let Some(subscription) = self.server.subscriptions.lock().get_mut(&subscription_id) {
            subscription.items.remove(&item_id);
        }
        Ok(())
    }

    async fn check_keep_alive(&self) -> bool {
        self.ensure_open().is_ok()
    }

    async fn reconnect(&self) -> GatewayResult<()> {
        self.server.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        self.server.ensure_healthy()
    }

    async fn close(&self) -> GatewayResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let owned: Vec<u32> = self.owned.lock().drain().collect();
        let mut subscriptions = self.server.subscriptions.lock();
        for id in owned {
            subscriptions.remove(&id);
        }
        self.server.closed_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// SimulatedConnector
// =============================================================================

/// Connects to simulated servers by endpoint URL.
#[derive(Default)]
pub struct SimulatedConnector {
    servers: DashMap<String, Arc<SimulatedServer>>,
}

impl SimulatedConnector {
    /// Creates a connector with no servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a server under its endpoint URL.
    pub fn add_server(&self, server: SimulatedServer) -> Arc<SimulatedServer> {
        let server = Arc::new(server);
        self.servers.insert(endpoint_key(&server.endpoint_url), server.clone());
        server
    }

    /// Returns the server registered for `url`.
    pub fn server(&self, url: &str) -> Option<Arc<SimulatedServer>> {
        self.servers.get(&endpoint_key(url)).map(|s| s.value().clone())
    }
}

#[async_trait]
impl SourceConnector for SimulatedConnector {
    async fn connect(&self, endpoint: &SourceEndpoint) -> GatewayResult<Arc<dyn SourceSession>> {
        let server = self
            .server(&endpoint.url)
            .ok_or_else(|| GatewayError::connection(&endpoint.url, "no server at endpoint"))?;
        server.ensure_healthy()?;

        if let Some(required) = server.required_credentials.read().as_ref() {
            if endpoint.credentials.as_ref() != Some(required) {
                return Err(GatewayError::connection(&endpoint.url, "BadUserAccessDenied"));
            }
        }

        server.connects.fetch_add(1, Ordering::SeqCst);
        debug!(endpoint = %endpoint.url, "Simulated session opened");
        Ok(Arc::new(SimulatedSession {
            server,
            owned: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// =============================================================================
// Development Server
// =============================================================================

/// Builds the development server with a handful of plant variables.
pub fn demo_server() -> SimulatedServer {
    let server = SimulatedServer::new(DEMO_ENDPOINT, "urn:ualink:demo");
    let ns = server.add_namespace(DEMO_NAMESPACE);
    server.add_variable(NodeId::string(ns, "Line1.Temperature"), "Temperature", Variant::Double(21.5));
    server.add_variable(NodeId::string(ns, "Line1.Pressure"), "Pressure", Variant::Double(1.013));
    server.add_variable(NodeId::string(ns, "Line1.Speed"), "Speed", Variant::Int32(1200));
    server.add_variable(NodeId::string(ns, "Line1.Running"), "Running", Variant::Boolean(true));
    server
}

/// Spawns a task that random-walks every numeric variable of `server`.
pub fn spawn_random_walk(
    server: Arc<SimulatedServer>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        info!(endpoint = %server.endpoint_url(), period_ms = period.as_millis() as u64, "Simulated value generator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for node_id in server.variables() {
                        let current = server.nodes.read().get(&node_id).map(|n| n.value.value.clone());
                        let next = match current {
                            Some(Variant::Double(v)) => Variant::Double(v + rand::thread_rng().gen_range(-0.5..0.5)),
                            Some(Variant::Int32(v)) => Variant::Int32(v + rand::thread_rng().gen_range(-10..=10)),
                            Some(Variant::Boolean(v)) if rand::thread_rng().gen_bool(0.05) => Variant::Boolean(!v),
                            _ => continue,
                        };
                        server.set_value(&node_id, next);
                    }
                }
            }
        }

        debug!("Simulated value generator stopped");
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{NotificationRouter, PointBinding};
    use ualink_core::{record_queue, DiagnosticCounters, RecordPayload};

    #[tokio::test]
    async fn test_connect_unknown_endpoint() {
        let connector = SimulatedConnector::new();
        let result = connector.connect(&SourceEndpoint::new("opc.tcp://nowhere:4840")).await;
        assert!(matches!(result, Err(GatewayError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_credentials_checked() {
        let connector = SimulatedConnector::new();
        let server = connector.add_server(SimulatedServer::new("opc.tcp://plc:4840", "urn:plc"));
        server.require_credentials("op", "secret");

        let anonymous = SourceEndpoint::new("opc.tcp://plc:4840");
        assert!(connector.connect(&anonymous).await.is_err());

        let authed = SourceEndpoint::new("opc.tcp://PLC:4840/").with_credentials("op", "secret");
        assert!(connector.connect(&authed).await.is_ok());
        assert_eq!(server.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_monitored_item_reports_initial_and_changes() {
        let connector = SimulatedConnector::new();
        let server = connector.add_server(SimulatedServer::new("opc.tcp://plc:4840", "urn:plc"));
        let node = NodeId::string(1, "Speed");
        server.add_variable(node.clone(), "Speed", Variant::Int32(1));

        let (sender, mut receiver) = record_queue(10, Arc::new(DiagnosticCounters::new()));
        let router = NotificationRouter::new(sender, &[]);
        let binding = Arc::new(PointBinding::new(server.endpoint_url(), "ns=1;s=Speed", "urn:plc", 1000, "Speed"));

        let session = connector.connect(&SourceEndpoint::new("opc.tcp://plc:4840")).await.unwrap();
        let sub = session.create_subscription(1000).await.unwrap();
        session
            .create_monitored_item(
                sub,
                MonitorRequest {
                    node_id: node.clone(),
                    sampling_interval_ms: 500,
                    event_filter: None,
                },
                NotificationSink::new(router, binding),
            )
            .await
            .unwrap();
        server.set_value(&node, Variant::Int32(2));

        let values: Vec<Variant> = std::iter::from_fn(|| receiver.try_recv())
            .map(|r| match r.payload {
                RecordPayload::Value(v) => v.value,
                RecordPayload::Event(_) => Variant::Null,
            })
            .collect();
        assert_eq!(values, vec![Variant::Int32(1), Variant::Int32(2)]);

        session.close().await.unwrap();
        assert_eq!(server.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_server_fails_keep_alive() {
        let connector = SimulatedConnector::new();
        let server = connector.add_server(SimulatedServer::new("opc.tcp://plc:4840", "urn:plc"));
        let session = connector.connect(&SourceEndpoint::new("opc.tcp://plc:4840")).await.unwrap();

        assert!(session.check_keep_alive().await);
        server.set_healthy(false);
        assert!(!session.check_keep_alive().await);
        assert!(session.reconnect().await.is_err());
        server.set_healthy(true);
        assert!(session.reconnect().await.is_ok());
        assert_eq!(server.reconnect_attempts(), 2);
    }
}
