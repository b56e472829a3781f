// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Live OPC UA backend built on the `opcua` client stack.
//!
//! Enabled with the `real-source` feature. Each [`SourceSession`] wraps one
//! `opcua` session whose publish loop runs on the session's own task; the
//! subscription callbacks hand notifications to the registered
//! [`NotificationSink`]s without blocking.
//!
//! `ofType` event filters are applied to the received `EventType` field.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use opcua::client::prelude::*;
use opcua::sync::RwLock as OpcUaRwLock;

use ualink_core::{
    DataValue, EventField, GatewayError, GatewayResult, SourceEndpoint, StatusCode,
    Variant,
};

use crate::node_id::{NodeId, NodeIdentifier};
use crate::router::NotificationSink;
use crate::source::{MonitorRequest, SourceConnector, SourceSession};

/// Event fields selected for every event monitored item.
pub const EVENT_FIELDS: [&str; 6] = ["EventId", "EventType", "SourceName", "Time", "Message", "Severity"];

// =============================================================================
// Configuration
// =============================================================================

/// Client settings of the live backend.
#[derive(Debug, Clone)]
pub struct RealSourceConfig {
    /// Application name announced to servers.
    pub application_name: String,
    /// Application URI announced to servers.
    pub application_uri: String,
    /// PKI directory for the client certificate and trust lists.
    pub pki_dir: Option<PathBuf>,
    /// Trust server certificates without a trust list entry.
    pub trust_server_certs: bool,
    /// Requested session timeout in milliseconds.
    pub session_timeout_ms: u32,
}

// =============================================================================
// Conversions
// =============================================================================

fn to_opcua_node_id(node_id: &NodeId) -> opcua::types::NodeId {
    match &node_id.identifier {
        NodeIdentifier::Numeric(v) => opcua::types::NodeId::new(node_id.namespace_index, *v),
        NodeIdentifier::String(v) => opcua::types::NodeId::new(node_id.namespace_index, v.clone()),
        NodeIdentifier::Guid(v) => {
            opcua::types::NodeId::new(node_id.namespace_index, opcua::types::Guid::from(*v))
        }
        NodeIdentifier::Opaque(v) => opcua::types::NodeId::new(
            node_id.namespace_index,
            opcua::types::ByteString::from(v.as_slice()),
        ),
    }
}

fn to_chrono(value: &opcua::types::DateTime) -> chrono::DateTime<chrono::Utc> {
    let dt = value.as_chrono();
    chrono::DateTime::from_timestamp(dt.timestamp(), dt.timestamp_subsec_nanos())
        .unwrap_or_else(chrono::Utc::now)
}

fn from_opcua_variant(variant: &opcua::types::Variant) -> Variant {
    use opcua::types::Variant as Ua;

    match variant {
        Ua::Empty => Variant::Null,
        Ua::Boolean(v) => Variant::Boolean(*v),
        Ua::SByte(v) => Variant::SByte(*v),
        Ua::Byte(v) => Variant::Byte(*v),
        Ua::Int16(v) => Variant::Int16(*v),
        Ua::UInt16(v) => Variant::UInt16(*v),
        Ua::Int32(v) => Variant::Int32(*v),
        Ua::UInt32(v) => Variant::UInt32(*v),
        Ua::Int64(v) => Variant::Int64(*v),
        Ua::UInt64(v) => Variant::UInt64(*v),
        Ua::Float(v) => Variant::Float(*v),
        Ua::Double(v) => Variant::Double(*v),
        Ua::String(v) => Variant::String(v.as_ref().to_string()),
        Ua::DateTime(v) => Variant::DateTime(to_chrono(v)),
        Ua::Guid(v) => Variant::Guid(uuid::Uuid::from_bytes(*v.as_bytes())),
        Ua::ByteString(v) => Variant::ByteString(v.value.clone().unwrap_or_default()),
        Ua::LocalizedText(v) => Variant::String(v.text.as_ref().to_string()),
        Ua::NodeId(v) => Variant::String(v.to_string()),
        Ua::Array(arr) => Variant::Array(arr.values.iter().map(from_opcua_variant).collect()),
        other => Variant::String(format!("{:?}", other)),
    }
}

fn from_opcua_data_value(value: &opcua::types::DataValue) -> DataValue {
    DataValue {
        value: value.value.as_ref().map(from_opcua_variant).unwrap_or_default(),
        status: StatusCode(value.status.as_ref().map(|s| s.bits()).unwrap_or(0)),
        source_timestamp: value.source_timestamp.as_ref().map(to_chrono),
        server_timestamp: value.server_timestamp.as_ref().map(to_chrono),
    }
}

fn event_filter() -> ExtensionObject {
    let select_clauses = EVENT_FIELDS
        .iter()
        .map(|name| SimpleAttributeOperand {
            type_definition_id: ObjectTypeId::BaseEventType.into(),
            browse_path: Some(vec![QualifiedName::new(0, *name)]),
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
        })
        .collect();
    let filter = EventFilter {
        select_clauses: Some(select_clauses),
        where_clause: ContentFilter { elements: None },
    };
    ExtensionObject::from_encodable(ObjectId::EventFilter_Encoding_DefaultBinary, &filter)
}

// =============================================================================
// Subscription Callback
// =============================================================================

struct ItemSink {
    sink: NotificationSink,
    event_types: Option<Vec<String>>,
}

type SinkTable = Arc<DashMap<u32, ItemSink>>;

struct SinkCallback {
    sinks: SinkTable,
}

impl OnSubscriptionNotification for SinkCallback {
    fn on_data_change(&mut self, items: &[&MonitoredItem]) {
        for item in items {
            if let Some(entry) = self.sinks.get(&item.client_handle()) {
                entry.sink.data_change(from_opcua_data_value(item.last_value()));
            }
        }
    }

    fn on_event(&mut self, events: &EventNotificationList) {
        for event in events.events.iter().flatten() {
            let Some(entry) = self.sinks.get(&event.client_handle) else {
                continue;
            };
            let fields: Vec<EventField> = EVENT_FIELDS
                .iter()
                .zip(event.event_fields.iter().flatten())
                .map(|(name, value)| EventField::new(*name, from_opcua_variant(value)))
                .collect();

            if let Some(types) = entry.event_types.as_ref().filter(|t| !t.is_empty()) {
                let event_type = fields
                    .iter()
                    .find(|f| f.name == "EventType")
                    .map(|f| f.value.to_string());
                if !event_type.is_some_and(|t| types.contains(&t)) {
                    continue;
                }
            }
            entry.sink.event(fields);
        }
    }
}

// =============================================================================
// OpcUaSession
// =============================================================================

struct OpcUaSession {
    endpoint_url: String,
    application_uri: String,
    namespaces: Vec<String>,
    session: Arc<OpcUaRwLock<Session>>,
    sinks: SinkTable,
    /// Items by (subscription id, item id), for sink cleanup.
    handles: DashMap<(u32, u32), u32>,
    next_handle: AtomicU32,
}

impl OpcUaSession {
    fn read(&self, node: &NodeId, attribute: AttributeId) -> GatewayResult<opcua::types::DataValue> {
        let request = ReadValueId {
            node_id: to_opcua_node_id(node),
            attribute_id: attribute as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        };
        let session = self.session.read();
        let mut results = session
            .read(&[request], TimestampsToReturn::Both, 0.0)
            .map_err(|e| GatewayError::transport(format!("read {} failed: {}", node, e)))?;
        results
            .pop()
            .ok_or_else(|| GatewayError::transport(format!("read {} returned nothing", node)))
    }

    fn bad_node(&self, node: &NodeId, status: opcua::types::StatusCode) -> GatewayError {
        GatewayError::resolution(&self.endpoint_url, node.to_string(), format!("{}", status))
    }
}

#[async_trait]
impl SourceSession for OpcUaSession {
    fn application_uri(&self) -> String {
        self.application_uri.clone()
    }

    fn namespace_array(&self) -> Vec<String> {
        self.namespaces.clone()
    }

    async fn read_value(&self, node: &NodeId) -> GatewayResult<DataValue> {
        Ok(from_opcua_data_value(&self.read(node, AttributeId::Value)?))
    }

    async fn read_display_name(&self, node: &NodeId) -> GatewayResult<String> {
        let value = self.read(node, AttributeId::DisplayName)?;
        if let Some(status) = value.status.filter(|s| s.is_bad()) {
            return Err(self.bad_node(node, status));
        }
        match value.value {
            Some(opcua::types::Variant::LocalizedText(text)) => Ok(text.text.as_ref().to_string()),
            _ => Ok(node.to_string()),
        }
    }

    async fn create_subscription(&self, publishing_interval_ms: u32) -> GatewayResult<u32> {
        let session = self.session.read();
        session
            .create_subscription(
                f64::from(publishing_interval_ms),
                10,
                30,
                0,
                0,
                true,
                SinkCallback {
                    sinks: self.sinks.clone(),
                },
            )
            .map_err(|e| GatewayError::transport(format!("create subscription failed: {}", e)))
    }

    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()> {
        let handles: Vec<(u32, u32)> = self
            .handles
            .iter()
            .filter(|entry| entry.key().0 == subscription_id)
            .map(|entry| *entry.key())
            .collect();
        for key in handles {
            if let Some((_, handle)) = self.handles.remove(&key) {
                self.sinks.remove(&handle);
            }
        }

        let session = self.session.read();
        session
            .delete_subscription(subscription_id)
            .map(|_| ())
            .map_err(|e| GatewayError::transport(format!("delete subscription failed: {}", e)))
    }

    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: MonitorRequest,
        sink: NotificationSink,
    ) -> GatewayResult<u32> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let (attribute, filter) = if request.is_event() {
            (AttributeId::EventNotifier, event_filter())
        } else {
            (AttributeId::Value, ExtensionObject::null())
        };
        let item = MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId {
                node_id: to_opcua_node_id(&request.node_id),
                attribute_id: attribute as u32,
                index_range: UAString::null(),
                data_encoding: QualifiedName::null(),
            },
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle: handle,
                sampling_interval: f64::from(request.sampling_interval_ms),
                filter,
                queue_size: 10,
                discard_oldest: true,
            },
        };

        // Registered first: the server may report the initial value before
        // the create call returns.
        self.sinks.insert(
            handle,
            ItemSink {
                sink,
                event_types: request
                    .event_filter
                    .clone()
                    .map(|f| f.into_iter().map(|c| c.of_type).collect()),
            },
        );

        let result = {
            let session = self.session.read();
            session.create_monitored_items(subscription_id, TimestampsToReturn::Both, &[item])
        };
        let created = match result {
            Ok(mut results) => results.pop(),
            Err(e) => {
                self.sinks.remove(&handle);
                return Err(GatewayError::transport(format!("create monitored item failed: {}", e)));
            }
        };

        match created {
            Some(created) if created.status_code.is_good() => {
                self.handles.insert((subscription_id, created.monitored_item_id), handle);
                trace!(node_id = %request.node_id, item_id = created.monitored_item_id, "Monitored item created");
                Ok(created.monitored_item_id)
            }
            Some(created) => {
                self.sinks.remove(&handle);
                Err(self.bad_node(&request.node_id, created.status_code))
            }
            None => {
                self.sinks.remove(&handle);
                Err(GatewayError::transport("create monitored item returned nothing"))
            }
        }
    }

    async fn delete_monitored_item(&self, subscription_id: u32, item_id: u32) -> GatewayResult<()> {
        if let Some((_, handle)) = self.handles.remove(&(subscription_id, item_id)) {
            self.sinks.remove(&handle);
        }
        let session = self.session.read();
        session
            .delete_monitored_items(subscription_id, &[item_id])
            .map(|_| ())
            .map_err(|e| GatewayError::transport(format!("delete monitored item failed: {}", e)))
    }

    async fn check_keep_alive(&self) -> bool {
        match self.read(&NodeId::SERVER_STATE, AttributeId::Value) {
            Ok(value) => value.status.map_or(true, |s| s.is_good()),
            Err(e) => {
                debug!(endpoint = %self.endpoint_url, error = %e, "Keep-alive read failed");
                false
            }
        }
    }

    async fn reconnect(&self) -> GatewayResult<()> {
        let mut session = self.session.write();
        session
            .reconnect_and_activate()
            .map_err(|e| GatewayError::connection(&self.endpoint_url, format!("reconnect failed: {}", e)))
    }

    async fn close(&self) -> GatewayResult<()> {
        self.sinks.clear();
        self.handles.clear();
        self.session.read().disconnect();
        Ok(())
    }
}

// =============================================================================
// OpcUaConnector
// =============================================================================

/// Connects to live OPC UA servers.
pub struct OpcUaConnector {
    config: RealSourceConfig,
}

impl OpcUaConnector {
    /// Creates a connector.
    pub fn new(config: RealSourceConfig) -> Self {
        Self { config }
    }

    fn connect_blocking(config: RealSourceConfig, endpoint: SourceEndpoint) -> GatewayResult<OpcUaSession> {
        let mut builder = ClientBuilder::new()
            .application_name(config.application_name.as_str())
            .application_uri(config.application_uri.as_str())
            .session_timeout(config.session_timeout_ms)
            .session_retry_limit(0);
        if let Some(pki_dir) = &config.pki_dir {
            builder = builder.pki_dir(pki_dir.clone());
        }
        if config.trust_server_certs {
            builder = builder.trust_server_certs(true);
        }
        let mut client = builder
            .client()
            .ok_or_else(|| GatewayError::connection(&endpoint.url, "invalid client configuration"))?;

        let endpoints = client
            .get_server_endpoints_from_url(endpoint.url.as_str())
            .map_err(|e| GatewayError::connection(&endpoint.url, format!("endpoint discovery failed: {}", e)))?;

        // Credentials only travel over an encrypted channel.
        let selected = if endpoint.security_required {
            endpoints
                .iter()
                .filter(|e| e.security_mode == MessageSecurityMode::SignAndEncrypt)
                .max_by_key(|e| e.security_level)
        } else {
            endpoints
                .iter()
                .find(|e| e.security_mode == MessageSecurityMode::None)
                .or_else(|| endpoints.iter().max_by_key(|e| e.security_level))
        }
        .cloned()
        .ok_or_else(|| GatewayError::connection(&endpoint.url, "no suitable endpoint"))?;

        let application_uri = selected.server.application_uri.as_ref().to_string();
        let identity = match &endpoint.credentials {
            Some(credentials) => IdentityToken::UserName(credentials.username.clone(), credentials.password.clone()),
            None => IdentityToken::Anonymous,
        };

        let session = client
            .connect_to_endpoint(selected, identity)
            .map_err(|e| GatewayError::connection(&endpoint.url, format!("session refused: {}", e)))?;
        let _ = Session::run_async(session.clone());

        let mut connected = OpcUaSession {
            endpoint_url: endpoint.url.clone(),
            application_uri,
            namespaces: Vec::new(),
            session,
            sinks: Arc::new(DashMap::new()),
            handles: DashMap::new(),
            next_handle: AtomicU32::new(1),
        };

        connected.namespaces = match connected.read(&NodeId::NAMESPACE_ARRAY, AttributeId::Value)?.value {
            Some(opcua::types::Variant::Array(array)) => array
                .values
                .iter()
                .map(|v| match v {
                    opcua::types::Variant::String(s) => s.as_ref().to_string(),
                    other => format!("{:?}", other),
                })
                .collect(),
            _ => {
                warn!(endpoint = %endpoint.url, "Server returned no namespace table");
                Vec::new()
            }
        };
        Ok(connected)
    }
}

#[async_trait]
impl SourceConnector for OpcUaConnector {
    async fn connect(&self, endpoint: &SourceEndpoint) -> GatewayResult<Arc<dyn SourceSession>> {
        info!(endpoint = %endpoint.url, security_required = endpoint.security_required, "Connecting to OPC UA server");
        let config = self.config.clone();
        let target = endpoint.clone();
        let session = tokio::task::spawn_blocking(move || Self::connect_blocking(config, target))
            .await
            .map_err(|e| GatewayError::connection(&endpoint.url, format!("connect task failed: {}", e)))??;
        Ok(Arc::new(session))
    }

    fn name(&self) -> &str {
        "opcua"
    }
}
