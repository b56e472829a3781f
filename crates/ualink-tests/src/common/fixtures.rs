// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built servers, settings, records and configuration documents.

use std::time::Duration;

use chrono::Utc;
use ualink_core::{
    writer_id, DataValue, EventField, GatewaySettings, MessageRecord, RecordPayload, Variant,
};
use ualink_opcua::{NodeId, SimulatedServer};

// =============================================================================
// Server Fixtures
// =============================================================================

/// Endpoint of the plant server.
pub const PLANT_URL: &str = "opc.tcp://plant:4840";

/// Endpoint of the second server.
pub const PACKAGING_URL: &str = "opc.tcp://packaging:4840";

/// Namespace of the plant variables, registered at index 2.
pub const PLANT_NAMESPACE: &str = "http://example.com/plant";

/// Application URI of the plant server.
pub const PLANT_APPLICATION_URI: &str = "urn:example:plant";

/// Pre-built simulated servers.
pub struct ServerFixtures;

impl ServerFixtures {
    /// Plant server with `Speed`, `Level`, `Temperature` and `Running`.
    pub fn plant() -> SimulatedServer {
        Self::with_variables(PLANT_URL, PLANT_APPLICATION_URI)
    }

    /// A second server holding the same variable names.
    pub fn packaging() -> SimulatedServer {
        Self::with_variables(PACKAGING_URL, "urn:example:packaging")
    }

    fn with_variables(url: &str, application_uri: &str) -> SimulatedServer {
        let server = SimulatedServer::new(url, application_uri);
        let ns = server.add_namespace(PLANT_NAMESPACE);
        server.add_variable(NodeId::string(ns, "Speed"), "Speed", Variant::Int32(1200));
        server.add_variable(NodeId::string(ns, "Level"), "Level", Variant::Double(1.5));
        server.add_variable(NodeId::string(ns, "Temperature"), "Temperature", Variant::Double(21.0));
        server.add_variable(NodeId::string(ns, "Running"), "Running", Variant::Boolean(true));
        server
    }

    /// Node id of a plant variable on a fixture server.
    pub fn node(name: &str) -> NodeId {
        NodeId::string(2, name)
    }

    /// `ns=` form of a plant variable.
    pub fn node_id(name: &str) -> String {
        format!("ns=2;s={}", name)
    }
}

// =============================================================================
// Settings Fixtures
// =============================================================================

/// Pre-built gateway settings.
pub struct SettingsFixtures;

impl SettingsFixtures {
    /// Batched mode with the given interval and broker message size.
    pub fn batched(send_interval: Duration, message_size: usize) -> GatewaySettings {
        GatewaySettings {
            send_interval,
            broker_message_size: message_size,
            ..GatewaySettings::for_testing()
        }
    }

    /// Every record becomes its own frame.
    pub fn immediate() -> GatewaySettings {
        GatewaySettings {
            send_interval: Duration::ZERO,
            broker_message_size: 0,
            ..GatewaySettings::for_testing()
        }
    }

    /// Default test settings with a queue of `capacity`.
    pub fn with_queue(capacity: usize) -> GatewaySettings {
        GatewaySettings {
            queue_capacity: capacity,
            ..GatewaySettings::for_testing()
        }
    }
}

// =============================================================================
// Record Fixtures
// =============================================================================

/// Pre-built message records.
pub struct RecordFixtures;

impl RecordFixtures {
    /// A good value record for a plant variable.
    pub fn value(name: &str, value: Variant) -> MessageRecord {
        MessageRecord {
            endpoint_url: PLANT_URL.to_string(),
            node_id: format!("nsu={};s={}", PLANT_NAMESPACE, name),
            application_uri: PLANT_APPLICATION_URI.to_string(),
            writer_id: writer_id(PLANT_APPLICATION_URI, 1000),
            display_name: name.to_string(),
            payload: RecordPayload::Value(DataValue::good(value)),
            timestamp: Utc::now(),
        }
    }

    /// A string record whose value is `len` characters long.
    pub fn sized(name: &str, len: usize) -> MessageRecord {
        Self::value(name, Variant::String("x".repeat(len)))
    }

    /// An event record from the server object.
    pub fn event(message: &str) -> MessageRecord {
        MessageRecord {
            payload: RecordPayload::Event(vec![
                EventField::new("EventType", Variant::String("i=2041".to_string())),
                EventField::new("Message", Variant::String(message.to_string())),
            ]),
            node_id: "i=2253".to_string(),
            display_name: "Server".to_string(),
            ..Self::value("Server", Variant::Null)
        }
    }

    /// `count` numbered records.
    pub fn batch(count: usize) -> Vec<MessageRecord> {
        (0..count)
            .map(|i| Self::value(&format!("Point{:03}", i), Variant::Int64(i as i64)))
            .collect()
    }
}

// =============================================================================
// Configuration Fixtures
// =============================================================================

/// Configuration documents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Complete YAML configuration.
    pub fn yaml() -> &'static str {
        r#"
gateway:
  publisher_name: line-gateway
  application_uri: urn:example:gateway
broker:
  kind: mqtt
  url: mq.plant.local
  port: 8883
  client_name: line-gateway
  username: gateway
  password: ${UALINK_TEST_BROKER_PASSWORD:changeit}
  message_topic: plant/telemetry
  metadata_topic: plant/metadata
  command_topic: plant/commands/#
  response_topic: plant/responses
  message_size: 131072
publisher:
  strategy: store_forward
  spill_dir: spill
  drain_batch: 4
batching:
  send_interval_secs: 2
  queue_capacity: 5000
source:
  backend: simulated
  default_publishing_interval_ms: 2000
  suppressed_status_codes: [2150694912]
persistence:
  points_file: points.json
  auto_load: true
diagnostics:
  interval_secs: 10
  send_status: true
logging:
  level: debug
  format: json
"#
    }

    /// Minimal TOML configuration.
    pub fn toml() -> &'static str {
        r#"
[broker]
url = "mq.plant.local"
message_topic = "plant/telemetry"
"#
    }

    /// Minimal JSON configuration.
    pub fn json() -> &'static str {
        r#"{ "broker": { "kind": "memory" }, "batching": { "send_interval_secs": 0 } }"#
    }
}
