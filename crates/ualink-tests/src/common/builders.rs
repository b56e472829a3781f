// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Builders
//!
//! Builders for records, publish requests and inbound commands.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Map, Value};

use ualink_core::{
    writer_id, AuthMode, CommandKind, DataValue, EventFilterClause, InboundMessage, MessageRecord,
    OpcEventEntry, OpcNodeEntry, PublishNodesRequest, RecordPayload, StatusCode, Variant,
};

use super::fixtures::{PLANT_APPLICATION_URI, PLANT_NAMESPACE, PLANT_URL};

/// Command topic filter used by the harness.
pub const COMMAND_TOPIC: &str = "ualink/commands/#";

/// Response topic prefix used by the harness.
pub const RESPONSE_TOPIC: &str = "ualink/responses";

// =============================================================================
// RecordBuilder
// =============================================================================

/// Builder for [`MessageRecord`].
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    name: String,
    value: Variant,
    status: StatusCode,
    publishing_interval_ms: u32,
    endpoint_url: String,
}

impl RecordBuilder {
    /// Creates a builder for a plant variable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Variant::Null,
            status: StatusCode::GOOD,
            publishing_interval_ms: 1000,
            endpoint_url: PLANT_URL.to_string(),
        }
    }

    /// Sets the value.
    pub fn value(mut self, value: Variant) -> Self {
        self.value = value;
        self
    }

    /// Sets a double value.
    pub fn double(self, value: f64) -> Self {
        self.value(Variant::Double(value))
    }

    /// Sets the status code.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Sets the publishing interval the writer id is derived from.
    pub fn publishing_interval(mut self, interval_ms: u32) -> Self {
        self.publishing_interval_ms = interval_ms;
        self
    }

    /// Sets the source endpoint.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    /// Builds the record.
    pub fn build(self) -> MessageRecord {
        let mut value = DataValue::good(self.value);
        value.status = self.status;
        MessageRecord {
            endpoint_url: self.endpoint_url,
            node_id: format!("nsu={};s={}", PLANT_NAMESPACE, self.name),
            application_uri: PLANT_APPLICATION_URI.to_string(),
            writer_id: writer_id(PLANT_APPLICATION_URI, self.publishing_interval_ms),
            display_name: self.name,
            payload: RecordPayload::Value(value),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// PublishRequestBuilder
// =============================================================================

/// Builder for [`PublishNodesRequest`].
#[derive(Debug, Clone)]
pub struct PublishRequestBuilder {
    request: PublishNodesRequest,
}

impl PublishRequestBuilder {
    /// Creates an anonymous request for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            request: PublishNodesRequest::new(url),
        }
    }

    /// Adds a variable with default intervals.
    pub fn node(self, id: impl Into<String>) -> Self {
        self.node_entry(OpcNodeEntry {
            id: id.into(),
            ..Default::default()
        })
    }

    /// Adds a variable with a publishing interval.
    pub fn node_with_interval(self, id: impl Into<String>, publishing_interval: u32) -> Self {
        self.node_entry(OpcNodeEntry {
            id: id.into(),
            publishing_interval,
            ..Default::default()
        })
    }

    /// Adds a variable entry.
    pub fn node_entry(mut self, entry: OpcNodeEntry) -> Self {
        self.request.opc_nodes.push(entry);
        self
    }

    /// Adds an event notifier with `ofType` filter clauses.
    pub fn event(mut self, id: impl Into<String>, of_types: &[&str]) -> Self {
        self.request.opc_events.push(OpcEventEntry {
            id: id.into(),
            filter: of_types
                .iter()
                .map(|t| EventFilterClause {
                    of_type: (*t).to_string(),
                })
                .collect(),
        });
        self
    }

    /// Requests user name authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.request.auth_mode = AuthMode::UsernamePassword;
        self.request.username = Some(username.into());
        self.request.password = Some(password.into());
        self
    }

    /// Sets the authentication mode without credentials.
    pub fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.request.auth_mode = mode;
        self
    }

    /// Builds the request.
    pub fn build(self) -> PublishNodesRequest {
        self.request
    }

    /// Builds the request as a JSON object.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.request).unwrap_or(Value::Null)
    }
}

// =============================================================================
// CommandBuilder
// =============================================================================

/// Builder for inbound command messages.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    topic: String,
    correlation_id: String,
    timestamp: Option<DateTime<Utc>>,
    body: Map<String, Value>,
    raw: Option<Vec<u8>>,
}

impl CommandBuilder {
    /// Creates a command routed by topic.
    pub fn new(kind: CommandKind) -> Self {
        Self::on_topic(format!("{}{}", COMMAND_TOPIC.trim_end_matches('#'), kind.as_str()))
    }

    /// Creates a command on an arbitrary topic.
    pub fn on_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Some(Utc::now()),
            body: Map::new(),
            raw: None,
        }
    }

    /// `PublishNodes` carrying `request`.
    pub fn publish(request: PublishRequestBuilder) -> Self {
        Self::new(CommandKind::PublishNodes).body(request.to_json())
    }

    /// `UnpublishNodes` carrying `request`.
    pub fn unpublish(request: PublishRequestBuilder) -> Self {
        Self::new(CommandKind::UnpublishNodes).body(request.to_json())
    }

    /// `UnpublishAllNodes`.
    pub fn unpublish_all() -> Self {
        Self::new(CommandKind::UnpublishAllNodes)
    }

    /// `GetPublishedNodes`.
    pub fn get_published() -> Self {
        Self::new(CommandKind::GetPublishedNodes)
    }

    /// `GetInfo`.
    pub fn get_info() -> Self {
        Self::new(CommandKind::GetInfo)
    }

    /// Sets the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Backdates the command.
    pub fn aged(mut self, age: std::time::Duration) -> Self {
        let age = ChronoDuration::from_std(age).unwrap_or_else(|_| ChronoDuration::zero());
        self.timestamp = Some(Utc::now() - age);
        self
    }

    /// Removes the timestamp.
    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }

    /// Merges the fields of a JSON object into the body.
    pub fn body(mut self, value: Value) -> Self {
        if let Value::Object(fields) = value {
            self.body.extend(fields);
        }
        self
    }

    /// Replaces the payload with raw bytes.
    pub fn raw(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.raw = Some(payload.into());
        self
    }

    /// Returns the correlation id.
    pub fn id(&self) -> &str {
        &self.correlation_id
    }

    /// Builds the inbound message.
    pub fn build(self) -> InboundMessage {
        if let Some(raw) = self.raw {
            return InboundMessage::new(self.topic, raw);
        }

        let mut payload = self.body;
        payload.insert("correlationId".to_string(), json!(self.correlation_id));
        if let Some(timestamp) = self.timestamp {
            payload.insert("timestamp".to_string(), json!(timestamp.to_rfc3339()));
        }
        InboundMessage::new(self.topic, Value::Object(payload).to_string())
    }
}
