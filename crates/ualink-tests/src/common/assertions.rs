// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Helpers for PubSub JSON frames and command responses.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use ualink_broker::CapturedResponse;

// =============================================================================
// Frame Helpers
// =============================================================================

/// Parses a PubSub JSON data frame and returns its `Messages` list.
///
/// Panics if the frame is not a `ua-data` message.
pub fn frame_messages(frame: &[u8]) -> Vec<Value> {
    let value: Value = serde_json::from_slice(frame)
        .unwrap_or_else(|e| panic!("Frame is not valid JSON ({}): {}", e, String::from_utf8_lossy(frame)));
    assert_eq!(value["MessageType"], "ua-data", "Not a data frame: {}", value);
    value["Messages"]
        .as_array()
        .cloned()
        .unwrap_or_else(|| panic!("Frame has no message list: {}", value))
}

/// Returns the display names carried by a PubSub JSON frame, in order.
pub fn frame_display_names(frame: &[u8]) -> Vec<String> {
    frame_messages(frame)
        .iter()
        .filter_map(|message| message["Payload"].as_object())
        .flat_map(|payload| payload.keys().cloned().collect::<Vec<_>>())
        .collect()
}

/// Returns the payload value for `display_name` in a PubSub JSON frame.
pub fn frame_value(frame: &[u8], display_name: &str) -> Option<Value> {
    frame_messages(frame)
        .iter()
        .find_map(|message| message["Payload"].get(display_name).cloned())
}

// =============================================================================
// Response Assertions
// =============================================================================

/// Assertion extensions for captured command responses.
pub trait ResponseAssertions {
    /// Assert a `200` response with `success = true`.
    fn assert_success(&self);

    /// Assert a `500` response with `success = false`.
    fn assert_failure(&self);

    /// Assert the response belongs to `correlation_id`.
    fn assert_correlation(&self, correlation_id: &str);

    /// The `status` field as a string.
    fn status_text(&self) -> String;

    /// The `status` field parsed as a JSON list of status lines.
    fn status_lines(&self) -> Vec<String>;
}

impl ResponseAssertions for CapturedResponse {
    fn assert_success(&self) {
        let body = self.json();
        assert_eq!(body["success"], true, "Expected success, got {}", body);
        assert!(
            self.topic.contains("/200/"),
            "Expected a 200 topic, got {}",
            self.topic
        );
    }

    fn assert_failure(&self) {
        let body = self.json();
        assert_eq!(body["success"], false, "Expected failure, got {}", body);
        assert!(
            self.topic.contains("/500/"),
            "Expected a 500 topic, got {}",
            self.topic
        );
    }

    fn assert_correlation(&self, correlation_id: &str) {
        assert_eq!(self.json()["correlationId"], correlation_id);
        assert!(
            self.topic.ends_with(&format!("/{}", correlation_id)),
            "Topic {} does not end with {}",
            self.topic,
            correlation_id
        );
    }

    fn status_text(&self) -> String {
        self.json()["status"].as_str().unwrap_or_default().to_string()
    }

    fn status_lines(&self) -> Vec<String> {
        serde_json::from_str(&self.status_text()).unwrap_or_default()
    }
}

// =============================================================================
// Async Assertions
// =============================================================================

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Asserts that `condition` holds within `timeout`.
pub async fn assert_eventually<F, Fut>(description: &str, timeout: Duration, condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert!(
        wait_until(timeout, condition).await,
        "Condition not met within {:?}: {}",
        timeout,
        description
    );
}
