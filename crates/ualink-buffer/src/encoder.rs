// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Record encoding.
//!
//! The batching engine only knows the [`MessageEncoder`] contract: a frame
//! header, one encoded string per record joined by a separator, and a
//! terminator. [`PubSubJsonEncoder`] implements the JSON PubSub layout:
//!
//! ```text
//! {"MessageId":"7","MessageType":"ua-data","PublisherId":"gw","Messages":[
//!   {"DataSetWriterId":4242,"Timestamp":"...","Payload":{"Temperature":21.5}},
//!   ...
//! ]}
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use ualink_core::{GatewayResult, MessageRecord, RecordPayload};

/// Byte length of the frame terminator `]}`.
pub const FRAME_CLOSING_LEN: usize = 2;

// =============================================================================
// MessageEncoder Trait
// =============================================================================

/// Encodes records into frame fragments.
pub trait MessageEncoder: Send + Sync {
    /// Returns the header opening a new data frame.
    fn encode_header(&self) -> String;

    /// Encodes one record.
    ///
    /// The result must be a self-contained element of the frame's message list.
    fn encode_record(&self, record: &MessageRecord) -> GatewayResult<String>;

    /// Returns the separator placed between two records.
    fn record_separator(&self) -> &str {
        ","
    }

    /// Returns the terminator closing a data frame.
    fn frame_terminator(&self) -> &str {
        "]}"
    }

    /// Encodes a complete metadata message describing the record's field.
    fn encode_metadata(&self, record: &MessageRecord, field_id: Uuid) -> GatewayResult<String>;

    /// Encodes a complete status message.
    fn encode_status(&self, next_report: DateTime<Utc>) -> GatewayResult<String>;
}

// =============================================================================
// PubSubJsonEncoder
// =============================================================================

/// JSON PubSub encoder.
#[derive(Debug)]
pub struct PubSubJsonEncoder {
    publisher_id: String,
    message_id: AtomicU64,
}

impl PubSubJsonEncoder {
    /// Creates an encoder publishing under `publisher_id`.
    pub fn new(publisher_id: impl Into<String>) -> Self {
        Self {
            publisher_id: publisher_id.into(),
            message_id: AtomicU64::new(0),
        }
    }

    fn next_message_id(&self) -> u64 {
        self.message_id.fetch_add(1, Ordering::Relaxed)
    }

    fn message_envelope(&self, message_type: &str) -> Map<String, Value> {
        let mut envelope = Map::new();
        envelope.insert(
            "MessageId".to_string(),
            Value::String(self.next_message_id().to_string()),
        );
        envelope.insert("MessageType".to_string(), Value::String(message_type.to_string()));
        envelope.insert(
            "PublisherId".to_string(),
            Value::String(self.publisher_id.clone()),
        );
        envelope
    }
}

impl MessageEncoder for PubSubJsonEncoder {
    fn encode_header(&self) -> String {
        let envelope = Value::Object(self.message_envelope("ua-data")).to_string();
        // Reopen the object to append the message list.
        format!("{},\"Messages\":[", &envelope[..envelope.len() - 1])
    }

    fn encode_record(&self, record: &MessageRecord) -> GatewayResult<String> {
        let mut message = Map::new();
        message.insert(
            "DataSetWriterId".to_string(),
            Value::from(writer_hash(&record.writer_id)),
        );

        let payload = match &record.payload {
            RecordPayload::Value(value) => {
                let timestamp = value
                    .server_timestamp
                    .or(value.source_timestamp)
                    .unwrap_or(record.timestamp);
                message.insert("Timestamp".to_string(), Value::String(timestamp.to_rfc3339()));
                if !value.status.is_good() {
                    message.insert("Status".to_string(), Value::from(value.status.0));
                }
                value.value.to_json()
            }
            RecordPayload::Event(fields) => Value::Object(
                fields
                    .iter()
                    .map(|field| (field.name.clone(), field.value.to_json()))
                    .collect(),
            ),
        };

        let mut named = Map::new();
        named.insert(record.display_name.clone(), payload);
        message.insert("Payload".to_string(), Value::Object(named));

        Ok(serde_json::to_string(&message)?)
    }

    fn encode_metadata(&self, record: &MessageRecord, field_id: Uuid) -> GatewayResult<String> {
        let (built_in_type, data_type) = match &record.payload {
            RecordPayload::Value(value) => (value.value.type_id(), value.value.type_name()),
            RecordPayload::Event(_) => (22, "ExtensionObject"),
        };

        let mut envelope = self.message_envelope("ua-metadata");
        envelope.insert(
            "DataSetWriterId".to_string(),
            Value::from(writer_hash(&record.writer_id)),
        );
        envelope.insert("Timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));
        envelope.insert(
            "MetaData".to_string(),
            json!({
                "Name": format!("{};{}", record.writer_id, record.node_id),
                "Fields": [{
                    "Name": record.display_name,
                    "BuiltInType": built_in_type,
                    "DataType": data_type,
                    "ValueRank": -1,
                    "DataSetFieldId": field_id.to_string(),
                }],
                "ConfigurationVersion": { "MajorVersion": 1, "MinorVersion": 1 },
            }),
        );

        Ok(serde_json::to_string(&envelope)?)
    }

    fn encode_status(&self, next_report: DateTime<Utc>) -> GatewayResult<String> {
        let mut envelope = self.message_envelope("ua-status");
        envelope.insert("Timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));
        envelope.insert("IsCyclic".to_string(), Value::Bool(true));
        envelope.insert("Status".to_string(), Value::String("Operational".to_string()));
        envelope.insert(
            "NextReportTime".to_string(),
            Value::String(next_report.to_rfc3339()),
        );

        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Folds a writer id into the 16-bit dataset writer id.
///
/// FNV-1a, so the value is stable across restarts and builds.
pub fn writer_hash(writer_id: &str) -> u16 {
    let hash = writer_id
        .bytes()
        .fold(0x811c_9dc5_u32, |acc, b| (acc ^ b as u32).wrapping_mul(0x0100_0193));
    ((hash >> 16) ^ (hash & 0xffff)) as u16
}

// =============================================================================
// Tests
// =============================================================================
