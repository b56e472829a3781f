// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded record queue between producers and the batching consumer.
//!
//! [`record_queue`] returns a cloneable [`RecordSender`] for every producer
//! (notification router, heartbeats, self-diagnostics) and a single
//! [`RecordReceiver`] for the batching engine. Inserts never wait: a full
//! queue rejects the record and bumps the failure counter.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::diagnostics::DiagnosticCounters;
use crate::types::MessageRecord;

/// A warning is logged once per this many rejected inserts.
pub const ENQUEUE_FAILURE_LOG_EVERY: u64 = 10_000;

/// Creates a bounded record queue.
///
/// A capacity of zero is raised to one.
pub fn record_queue(
    capacity: usize,
    diagnostics: Arc<DiagnosticCounters>,
) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        RecordSender {
            tx,
            diagnostics: diagnostics.clone(),
        },
        RecordReceiver { rx, diagnostics },
    )
}

// =============================================================================
// RecordSender
// =============================================================================

/// Producer handle of the record queue.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<MessageRecord>,
    diagnostics: Arc<DiagnosticCounters>,
}

impl RecordSender {
    /// Inserts a record without waiting.
    ///
    /// Returns `false` if the queue is full or closed.
    pub fn try_enqueue(&self, record: MessageRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.diagnostics.record_enqueue(self.len());
                true
            }
            Err(_) => {
                let failures = self.diagnostics.record_enqueue_failure();
                if failures % ENQUEUE_FAILURE_LOG_EVERY == 0 {
                    warn!(
                        failures,
                        capacity = self.capacity(),
                        "Record queue full, notifications are being dropped"
                    );
                }
                false
            }
        }
    }

    /// Returns the number of records waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Returns `true` if no record is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the queue capacity.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Returns `true` once the receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// RecordReceiver
// =============================================================================

/// Consumer handle of the record queue.
#[derive(Debug)]
pub struct RecordReceiver {
    rx: mpsc::Receiver<MessageRecord>,
    diagnostics: Arc<DiagnosticCounters>,
}

impl RecordReceiver {
    /// Waits for the next record. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<MessageRecord> {
        let record = self.rx.recv().await;
        self.diagnostics.set_queue_count(self.rx.len());
        record
    }

    /// Takes a record if one is already waiting.
    pub fn try_recv(&mut self) -> Option<MessageRecord> {
        let record = self.rx.try_recv().ok();
        self.diagnostics.set_queue_count(self.rx.len());
        record
    }

    /// Returns the number of records waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if no record is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordPayload;
    use crate::value::{DataValue, Variant};
    use chrono::Utc;

    fn record(name: &str) -> MessageRecord {
        MessageRecord {
            endpoint_url: "opc.tcp://test".into(),
            node_id: format!("ns=1;s={}", name),
            application_uri: "urn:test".into(),
            writer_id: "urn:test:1000".into(),
            display_name: name.into(),
            payload: RecordPayload::Value(DataValue::good(Variant::Int32(1))),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_full_queue_fails_fast() {
        let diagnostics = Arc::new(DiagnosticCounters::new());
        let (tx, mut rx) = record_queue(2, diagnostics.clone());

        assert!(tx.try_enqueue(record("a")));
        assert!(tx.try_enqueue(record("b")));
        assert!(!tx.try_enqueue(record("c")));

        assert_eq!(diagnostics.enqueue_count(), 2);
        assert_eq!(diagnostics.enqueue_failure_count(), 1);
        assert_eq!(tx.len(), 2);

        assert_eq!(rx.recv().await.unwrap().display_name, "a");
        assert!(tx.try_enqueue(record("d")));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let diagnostics = Arc::new(DiagnosticCounters::new());
        let (tx, rx) = record_queue(4, diagnostics.clone());
        drop(rx);

        assert!(tx.is_closed());
        assert!(!tx.try_enqueue(record("a")));
        assert_eq!(diagnostics.enqueue_failure_count(), 1);
    }

    #[test]
    fn test_try_recv_preserves_order() {
        let diagnostics = Arc::new(DiagnosticCounters::new());
        let (tx, mut rx) = record_queue(8, diagnostics);
        for name in ["x", "y", "z"] {
            tx.try_enqueue(record(name));
        }

        let drained: Vec<_> = std::iter::from_fn(|| rx.try_recv())
            .map(|r| r.display_name)
            .collect();
        assert_eq!(drained, vec!["x", "y", "z"]);
    }
}
