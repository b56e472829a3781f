// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core domain types.
//!
//! - [`SourceEndpoint`] identifies one source server.
//! - [`PublishNodesRequest`] is the wire and persisted shape of a publish
//!   request; it expands into one [`PointSpec`] per node or event entry.
//! - [`MessageRecord`] is a normalized notification on its way to the broker.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::value::{DataValue, StatusCode, Variant};

// =============================================================================
// Authentication
// =============================================================================

/// How the gateway authenticates against a source endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthMode {
    /// No user identity.
    #[default]
    #[serde(alias = "anonymous")]
    Anonymous,
    /// User name and password identity.
    #[serde(alias = "usernamePassword", alias = "username_password")]
    UsernamePassword,
}

impl AuthMode {
    /// Returns `true` if this mode needs credentials.
    #[inline]
    pub fn requires_credentials(&self) -> bool {
        matches!(self, Self::UsernamePassword)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UsernamePassword => write!(f, "UsernamePassword"),
        }
    }
}

/// User name and password for a source session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// SourceEndpoint
// =============================================================================

/// One source server as addressed by a publish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoint {
    /// Endpoint URL, e.g. `opc.tcp://plc-01:4840`.
    pub url: String,
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// Credentials when `auth_mode` needs them.
    pub credentials: Option<Credentials>,
    /// Whether a signed and encrypted channel is required.
    pub security_required: bool,
}

impl SourceEndpoint {
    /// Creates an anonymous endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            auth_mode: AuthMode::Anonymous,
            credentials: None,
            security_required: false,
        }
    }

    /// Switches the endpoint to user name and password authentication.
    ///
    /// Credentials are only sent over an encrypted channel.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth_mode = AuthMode::UsernamePassword;
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self.security_required = true;
        self
    }

    /// Returns the pool key for this endpoint.
    ///
    /// Two requests that differ only in case or a trailing slash address the
    /// same server and share one session.
    pub fn key(&self) -> String {
        endpoint_key(&self.url)
    }
}

impl fmt::Display for SourceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Normalizes an endpoint URL into its pool key.
pub fn endpoint_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}

// =============================================================================
// Publish Request Model
// =============================================================================

/// A monitored variable entry of a publish request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcNodeEntry {
    /// Node id, `ns=` or `nsu=` form.
    pub id: String,
    /// Sampling interval in milliseconds (0 selects the default).
    #[serde(default)]
    pub sampling_interval: u32,
    /// Publishing interval in milliseconds (0 selects the default).
    #[serde(default)]
    pub publishing_interval: u32,
    /// Heartbeat interval in milliseconds (0 disables the heartbeat).
    #[serde(default)]
    pub heartbeat_interval: u32,
    /// Swallow the first notification after publishing.
    #[serde(default)]
    pub skip_first: bool,
}

/// One clause of an event filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilterClause {
    /// Event type node id the event must be of.
    pub of_type: String,
}

/// An event notifier entry of a publish request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcEventEntry {
    /// Notifier node id. Empty selects the server object.
    #[serde(default)]
    pub id: String,
    /// Filter clauses; an empty list accepts all events.
    #[serde(default)]
    pub filter: Vec<EventFilterClause>,
}

/// A publish request for one endpoint.
///
/// This is both the `PublishNodes` command body and one element of the
/// persisted point-set file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishNodesRequest {
    /// Endpoint URL.
    pub endpoint_url: String,
    /// Variables to monitor.
    #[serde(default)]
    pub opc_nodes: Vec<OpcNodeEntry>,
    /// Event notifiers to monitor.
    #[serde(default)]
    pub opc_events: Vec<OpcEventEntry>,
    /// Authentication mode.
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// User name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl PublishNodesRequest {
    /// Creates an empty anonymous request for an endpoint.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Default::default()
        }
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the endpoint URL is blank, or if user
    /// name authentication is requested with both credentials blank.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.endpoint_url.trim().is_empty() {
            return Err(GatewayError::validation("endpointUrl", "must not be empty"));
        }

        if self.auth_mode.requires_credentials() {
            let username_blank = self.username.as_deref().map_or(true, |u| u.trim().is_empty());
            let password_blank = self.password.as_deref().map_or(true, |p| p.trim().is_empty());
            if username_blank && password_blank {
                return Err(GatewayError::validation(
                    "username",
                    "UsernamePassword authentication requires a user name and password",
                ));
            }
        }

        Ok(())
    }

    /// Returns the source endpoint this request addresses.
    pub fn endpoint(&self) -> SourceEndpoint {
        let endpoint = SourceEndpoint::new(self.endpoint_url.clone());
        if self.auth_mode.requires_credentials() {
            endpoint.with_credentials(
                self.username.clone().unwrap_or_default(),
                self.password.clone().unwrap_or_default(),
            )
        } else {
            endpoint
        }
    }

    /// Expands the request into one point per node and event entry.
    pub fn points(&self) -> Vec<PointSpec> {
        let variables = self.opc_nodes.iter().map(|node| PointSpec {
            node_id: node.id.clone(),
            publishing_interval_ms: node.publishing_interval,
            sampling_interval_ms: node.sampling_interval,
            heartbeat_interval_ms: node.heartbeat_interval,
            skip_first: node.skip_first,
            event_filter: None,
        });
        let events = self
            .opc_events
            .iter()
            .map(|event| PointSpec::event(event.id.clone(), event.filter.clone()));

        variables.chain(events).collect()
    }

    /// Returns the number of entries in the request.
    pub fn entry_count(&self) -> usize {
        self.opc_nodes.len() + self.opc_events.len()
    }
}

// =============================================================================
// PointSpec
// =============================================================================

/// One point to publish or unpublish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointSpec {
    /// Node id as requested.
    pub node_id: String,
    /// Publishing interval in milliseconds (0 selects the default).
    pub publishing_interval_ms: u32,
    /// Sampling interval in milliseconds (0 selects the default).
    pub sampling_interval_ms: u32,
    /// Heartbeat interval in milliseconds (0 disables the heartbeat).
    pub heartbeat_interval_ms: u32,
    /// Swallow the first notification after publishing.
    pub skip_first: bool,
    /// Event filter; `Some` marks an event point.
    pub event_filter: Option<Vec<EventFilterClause>>,
}

impl PointSpec {
    /// Creates a variable point with default intervals.
    pub fn variable(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            publishing_interval_ms: 0,
            sampling_interval_ms: 0,
            heartbeat_interval_ms: 0,
            skip_first: false,
            event_filter: None,
        }
    }

    /// Creates an event point.
    pub fn event(node_id: impl Into<String>, filter: Vec<EventFilterClause>) -> Self {
        Self {
            event_filter: Some(filter),
            ..Self::variable(node_id)
        }
    }

    /// Sets the publishing interval.
    pub fn with_publishing_interval(mut self, interval_ms: u32) -> Self {
        self.publishing_interval_ms = interval_ms;
        self
    }

    /// Sets the sampling interval.
    pub fn with_sampling_interval(mut self, interval_ms: u32) -> Self {
        self.sampling_interval_ms = interval_ms;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat(mut self, interval_ms: u32) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    /// Enables skip-first.
    pub fn with_skip_first(mut self, skip_first: bool) -> Self {
        self.skip_first = skip_first;
        self
    }

    /// Returns `true` for event points.
    #[inline]
    pub fn is_event(&self) -> bool {
        self.event_filter.is_some()
    }
}

// =============================================================================
// MessageRecord
// =============================================================================

/// Builds the writer id for an application and publishing interval.
///
/// Identical node ids on different servers end up under different writers.
pub fn writer_id(application_uri: &str, publishing_interval_ms: u32) -> String {
    format!("{}:{}", application_uri, publishing_interval_ms)
}

/// A named event field.
#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    /// Field name, e.g. `Severity`.
    pub name: String,
    /// Field value.
    pub value: Variant,
}

impl EventField {
    /// Creates an event field.
    pub fn new(name: impl Into<String>, value: Variant) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Content of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    /// A data change or heartbeat value.
    Value(DataValue),
    /// An event with its selected fields.
    Event(Vec<EventField>),
}

/// A normalized notification ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Source endpoint URL.
    pub endpoint_url: String,
    /// Resolved node id, expanded form.
    pub node_id: String,
    /// Application URI of the source server.
    pub application_uri: String,
    /// Writer id (application identity and publishing interval).
    pub writer_id: String,
    /// Display name of the node.
    pub display_name: String,
    /// Value or event fields.
    pub payload: RecordPayload,
    /// Time the record was created.
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    /// Returns `true` if this record carries event fields.
    #[inline]
    pub fn is_event(&self) -> bool {
        matches!(self.payload, RecordPayload::Event(_))
    }

    /// Returns the status of a value record, `Good` for events.
    pub fn status(&self) -> StatusCode {
        match &self.payload {
            RecordPayload::Value(value) => value.status,
            RecordPayload::Event(_) => StatusCode::GOOD,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
