// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification routing.
//!
//! Source backends deliver data changes and events on their own threads.
//! The [`NotificationRouter`] turns each one into a [`MessageRecord`] and
//! offers it to the bounded record queue with a non-blocking `try_send`.
//! A full queue drops the record and counts the failure; the backend is
//! never blocked.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tracing::trace;

use ualink_core::{
    endpoint_key, writer_id, DataValue, EventField, MessageRecord, RecordPayload, RecordSender,
};

// =============================================================================
// PointBinding
// =============================================================================

/// Identity of a published point, attached to every record it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointBinding {
    /// Source endpoint URL.
    pub endpoint_url: String,
    /// Resolved node id, expanded form.
    pub node_id: String,
    /// Application URI of the source server.
    pub application_uri: String,
    /// Writer id derived from the application URI and publishing interval.
    pub writer_id: String,
    /// Display name read from the server.
    pub display_name: String,
    skip_key: String,
}

impl PointBinding {
    /// Creates a binding.
    pub fn new(
        endpoint_url: impl Into<String>,
        node_id: impl Into<String>,
        application_uri: impl Into<String>,
        publishing_interval_ms: u32,
        display_name: impl Into<String>,
    ) -> Self {
        let endpoint_url = endpoint_url.into();
        let node_id = node_id.into();
        let application_uri = application_uri.into();
        Self {
            skip_key: format!("{}|{}", endpoint_key(&endpoint_url), node_id),
            writer_id: writer_id(&application_uri, publishing_interval_ms),
            endpoint_url,
            node_id,
            application_uri,
            display_name: display_name.into(),
        }
    }

    /// Key of the skip-first gate for this point.
    pub fn skip_key(&self) -> &str {
        &self.skip_key
    }

    /// Builds a record stamped with the current time.
    pub fn record(&self, payload: RecordPayload) -> MessageRecord {
        MessageRecord {
            endpoint_url: self.endpoint_url.clone(),
            node_id: self.node_id.clone(),
            application_uri: self.application_uri.clone(),
            writer_id: self.writer_id.clone(),
            display_name: self.display_name.clone(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// NotificationRouter
// =============================================================================

/// What happened to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Offered to the queue and accepted.
    Enqueued,
    /// Dropped because its status code is suppressed.
    Suppressed,
    /// Swallowed by the skip-first gate.
    Skipped,
    /// Dropped because the queue was full or closed.
    Dropped,
}

struct RouterInner {
    sender: RecordSender,
    suppressed: HashSet<u32>,
    skip_first: DashSet<String>,
}

/// Converts source notifications into queued records.
#[derive(Clone)]
pub struct NotificationRouter {
    inner: Arc<RouterInner>,
}

impl NotificationRouter {
    /// Creates a router that suppresses values carrying any of `suppressed`.
    pub fn new(sender: RecordSender, suppressed: &[u32]) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                sender,
                suppressed: suppressed.iter().copied().collect(),
                skip_first: DashSet::new(),
            }),
        }
    }

    /// Returns the queue handle.
    pub fn sender(&self) -> &RecordSender {
        &self.inner.sender
    }

    /// Arms the skip-first gate so the next data change of `binding` is swallowed.
    pub fn arm_skip_first(&self, binding: &PointBinding) {
        self.inner.skip_first.insert(binding.skip_key.clone());
    }

    /// Disarms the skip-first gate of `binding`.
    pub fn disarm_skip_first(&self, binding: &PointBinding) {
        self.inner.skip_first.remove(binding.skip_key());
    }

    /// Disarms every gate.
    pub fn clear_skip_first(&self) {
        self.inner.skip_first.clear();
    }

    /// Returns `true` if the next data change of `binding` will be swallowed.
    pub fn is_skip_armed(&self, binding: &PointBinding) -> bool {
        self.inner.skip_first.contains(binding.skip_key())
    }

    /// Routes a data change.
    pub fn on_data_change(&self, binding: &PointBinding, value: DataValue) -> RouteOutcome {
        if self.inner.suppressed.contains(&value.status.0) {
            trace!(node_id = %binding.node_id, status = %value.status, "Suppressed notification");
            return RouteOutcome::Suppressed;
        }

        // Removal is atomic, so concurrent notifications swallow exactly one.
        if self.inner.skip_first.remove(binding.skip_key()).is_some() {
            trace!(node_id = %binding.node_id, "Skipped first notification");
            return RouteOutcome::Skipped;
        }

        self.enqueue(binding.record(RecordPayload::Value(value)))
    }

    /// Routes an event.
    pub fn on_event(&self, binding: &PointBinding, fields: Vec<EventField>) -> RouteOutcome {
        self.enqueue(binding.record(RecordPayload::Event(fields)))
    }

    fn enqueue(&self, record: MessageRecord) -> RouteOutcome {
        if self.inner.sender.try_enqueue(record) {
            RouteOutcome::Enqueued
        } else {
            RouteOutcome::Dropped
        }
    }
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("suppressed", &self.inner.suppressed)
            .field("armed", &self.inner.skip_first.len())
            .finish()
    }
}

// =============================================================================
// NotificationSink
// =============================================================================

/// Callback handle a backend holds for one monitored item.
///
/// Both methods return immediately and are safe to call from any thread.
#[derive(Clone, Debug)]
pub struct NotificationSink {
    router: NotificationRouter,
    binding: Arc<PointBinding>,
}

impl NotificationSink {
    /// Binds a router to a point.
    pub fn new(router: NotificationRouter, binding: Arc<PointBinding>) -> Self {
        Self { router, binding }
    }

    /// Returns the point binding.
    pub fn binding(&self) -> &Arc<PointBinding> {
        &self.binding
    }

    /// Delivers a data change.
    pub fn data_change(&self, value: DataValue) -> RouteOutcome {
        self.router.on_data_change(&self.binding, value)
    }

    /// Delivers an event.
    pub fn event(&self, fields: Vec<EventField>) -> RouteOutcome {
        self.router.on_event(&self.binding, fields)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ualink_core::{record_queue, DiagnosticCounters, StatusCode, Variant};

    fn binding() -> PointBinding {
        PointBinding::new("opc.tcp://plc:4840", "ns=2;s=Speed", "urn:plc", 1000, "Speed")
    }

    #[test]
    fn test_binding_writer_id() {
        let binding = binding();
        assert_eq!(binding.writer_id, "urn:plc:1000");
        assert_eq!(binding.skip_key(), "opc.tcp://plc:4840|ns=2;s=Speed");
    }

    #[test]
    fn test_skip_first_swallows_once() {
        let diagnostics = Arc::new(DiagnosticCounters::new());
        let (sender, mut receiver) = record_queue(10, diagnostics);
        let router = NotificationRouter::new(sender, &[]);
        let binding = binding();

        router.arm_skip_first(&binding);
        assert_eq!(
            router.on_data_change(&binding, DataValue::good(Variant::Int32(1))),
            RouteOutcome::Skipped
        );
        assert_eq!(
            router.on_data_change(&binding, DataValue::good(Variant::Int32(2))),
            RouteOutcome::Enqueued
        );

        let record = receiver.try_recv().unwrap();
        assert_eq!(record.payload, RecordPayload::Value(DataValue::good(Variant::Int32(2))));
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_suppressed_status_dropped() {
        let diagnostics = Arc::new(DiagnosticCounters::new());
        let (sender, receiver) = record_queue(10, diagnostics);
        let router = NotificationRouter::new(sender, &[StatusCode::BAD_NO_COMMUNICATION.0]);

        let outcome = router.on_data_change(
            &binding(),
            DataValue::with_status(StatusCode::BAD_NO_COMMUNICATION),
        );
        assert_eq!(outcome, RouteOutcome::Suppressed);
        assert!(receiver.is_empty());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let diagnostics = Arc::new(DiagnosticCounters::new());
        let (sender, _receiver) = record_queue(1, diagnostics.clone());
        let router = NotificationRouter::new(sender, &[]);
        let binding = binding();

        assert_eq!(
            router.on_event(&binding, vec![EventField::new("Message", Variant::from("a"))]),
            RouteOutcome::Enqueued
        );
        assert_eq!(router.on_event(&binding, Vec::new()), RouteOutcome::Dropped);
        assert_eq!(diagnostics.enqueue_failure_count(), 1);
    }
}
