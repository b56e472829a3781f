// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! - [`RecordingPublisher`]: captures frames with their send time
//! - [`FakeEncoder`]: a minimal JSON encoder with a matching decoder

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::Instant;
use uuid::Uuid;

use ualink_buffer::{MessageEncoder, Publisher};
use ualink_core::{GatewayResult, MessageRecord, RecordPayload};

// =============================================================================
// RecordingPublisher
// =============================================================================

/// A frame captured by [`RecordingPublisher`].
#[derive(Debug, Clone)]
pub struct SentFrame {
    /// Time the frame was handed over.
    pub at: Instant,
    /// Frame bytes.
    pub bytes: Vec<u8>,
}

/// Publisher that records every frame.
#[derive(Debug)]
pub struct RecordingPublisher {
    frames: Mutex<Vec<SentFrame>>,
    metadata: Mutex<Vec<Vec<u8>>>,
    accept: AtomicBool,
    attempts: AtomicU64,
}

impl RecordingPublisher {
    /// Creates a publisher that accepts every frame.
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            metadata: Mutex::new(Vec::new()),
            accept: AtomicBool::new(true),
            attempts: AtomicU64::new(0),
        }
    }

    /// Makes later sends succeed or fail.
    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    /// Accepted frames in send order.
    pub fn frames(&self) -> Vec<SentFrame> {
        self.frames.lock().clone()
    }

    /// Number of accepted frames.
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Accepted metadata messages.
    pub fn metadata(&self) -> Vec<Vec<u8>> {
        self.metadata.lock().clone()
    }

    /// Number of send calls, accepted or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn send(&self, frame: &[u8]) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accept.load(Ordering::SeqCst) {
            return false;
        }
        self.frames.lock().push(SentFrame {
            at: Instant::now(),
            bytes: frame.to_vec(),
        });
        true
    }

    async fn send_metadata(&self, message: &[u8]) -> bool {
        if !self.accept.load(Ordering::SeqCst) {
            return false;
        }
        self.metadata.lock().push(message.to_vec());
        true
    }

    fn strategy(&self) -> &'static str {
        "recording"
    }
}

// =============================================================================
// FakeEncoder
// =============================================================================

/// Encodes a frame as a JSON array of `{display name: value}` objects.
#[derive(Debug, Default)]
pub struct FakeEncoder;

impl FakeEncoder {
    /// Creates the encoder.
    pub fn new() -> Self {
        Self
    }

    /// Decodes a frame back into `(display name, value)` pairs.
    pub fn decode(frame: &[u8]) -> Vec<(String, Value)> {
        let Ok(Value::Array(items)) = serde_json::from_slice::<Value>(frame) else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(fields) => fields.into_iter().next(),
                _ => None,
            })
            .collect()
    }
}

impl MessageEncoder for FakeEncoder {
    fn encode_header(&self) -> String {
        "[".to_string()
    }

    fn encode_record(&self, record: &MessageRecord) -> GatewayResult<String> {
        let value = match &record.payload {
            RecordPayload::Value(value) => value.value.to_json(),
            RecordPayload::Event(fields) => Value::Object(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), f.value.to_json()))
                    .collect(),
            ),
        };
        let mut object = Map::new();
        object.insert(record.display_name.clone(), value);
        Ok(Value::Object(object).to_string())
    }

    fn frame_terminator(&self) -> &str {
        "]"
    }

    fn encode_metadata(&self, record: &MessageRecord, field_id: Uuid) -> GatewayResult<String> {
        Ok(serde_json::json!({ "name": record.display_name, "field": field_id.to_string() }).to_string())
    }

    fn encode_status(&self, next_report: DateTime<Utc>) -> GatewayResult<String> {
        Ok(serde_json::json!({ "status": "ok", "next": next_report.to_rfc3339() }).to_string())
    }
}
