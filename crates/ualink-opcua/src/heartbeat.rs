// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-point heartbeat timers.
//!
//! A point with a heartbeat interval gets its own task that reads the
//! node's current value on every tick and enqueues it, so slow-changing
//! values still reach the broker. The task stops when the point is
//! unpublished, its session is torn down, or the gateway shuts down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use ualink_core::{RecordPayload, RecordSender};

use crate::node_id::NodeId;
use crate::router::PointBinding;
use crate::session::SessionId;
use crate::source::SourceSession;

type HeartbeatKey = (SessionId, String);

struct HeartbeatTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Owns the heartbeat tasks of all published points.
pub struct HeartbeatScheduler {
    tasks: Mutex<HashMap<HeartbeatKey, HeartbeatTask>>,
    sender: RecordSender,
    cancel: CancellationToken,
}

impl HeartbeatScheduler {
    /// Creates a scheduler whose tasks stop when `cancel` fires.
    pub fn new(sender: RecordSender, cancel: CancellationToken) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            sender,
            cancel,
        }
    }

    /// Starts (or restarts) the heartbeat of a point.
    pub fn start(
        &self,
        session_id: SessionId,
        binding: Arc<PointBinding>,
        node: NodeId,
        source: Arc<dyn SourceSession>,
        interval: Duration,
    ) {
        if interval.is_zero() {
            return;
        }

        let key = (session_id, binding.node_id.clone());
        let cancel = self.cancel.child_token();
        let sender = self.sender.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match source.read_value(&node).await {
                            Ok(value) => {
                                let record = binding.record(RecordPayload::Value(value));
                                if !sender.try_enqueue(record) {
                                    trace!(node_id = %binding.node_id, "Heartbeat dropped, queue full");
                                }
                            }
                            Err(e) => {
                                debug!(node_id = %binding.node_id, error = %e, "Heartbeat read failed");
                            }
                        }
                    }
                }
            }
        });

        debug!(node_id = %key.1, interval_ms = interval.as_millis() as u64, "Heartbeat started");
        if let Some(previous) = self.tasks.lock().insert(key, HeartbeatTask { cancel, handle }) {
            previous.stop();
        }
    }

    /// Stops the heartbeat of one point. Returns `true` if one was running.
    pub fn stop(&self, session_id: SessionId, node_id: &str) -> bool {
        match self.tasks.lock().remove(&(session_id, node_id.to_string())) {
            Some(task) => {
                task.stop();
                true
            }
            None => false,
        }
    }

    /// Stops every heartbeat of a session. Returns how many were stopped.
    pub fn stop_session(&self, session_id: SessionId) -> usize {
        let mut tasks = self.tasks.lock();
        let keys: Vec<HeartbeatKey> = tasks.keys().filter(|(id, _)| *id == session_id).cloned().collect();
        for key in &keys {
            if let Some(task) = tasks.remove(key) {
                task.stop();
            }
        }
        keys.len()
    }

    /// Stops every heartbeat.
    pub fn stop_all(&self) {
        for (_, task) in self.tasks.lock().drain() {
            task.stop();
        }
    }

    /// Number of running heartbeats.
    pub fn active_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns `true` if the point has a running heartbeat.
    pub fn is_active(&self, session_id: SessionId, node_id: &str) -> bool {
        self.tasks.lock().contains_key(&(session_id, node_id.to_string()))
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedConnector, SimulatedServer};
    use crate::source::SourceConnector;
    use ualink_core::{record_queue, DiagnosticCounters, SourceEndpoint, Variant};

    async fn fixture() -> (Arc<dyn SourceSession>, NodeId) {
        let connector = SimulatedConnector::new();
        let server = connector.add_server(SimulatedServer::new("opc.tcp://plc:4840", "urn:plc"));
        let node = NodeId::string(1, "Level");
        server.add_variable(node.clone(), "Level", Variant::Double(4.2));
        let session = connector.connect(&SourceEndpoint::new("opc.tcp://plc:4840")).await.unwrap();
        (session, node)
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reads_on_interval() {
        let (session, node) = fixture().await;
        let (sender, mut receiver) = record_queue(10, Arc::new(DiagnosticCounters::new()));
        let scheduler = HeartbeatScheduler::new(sender, CancellationToken::new());
        let binding = Arc::new(PointBinding::new("opc.tcp://plc:4840", "ns=1;s=Level", "urn:plc", 1000, "Level"));

        scheduler.start(1, binding, node, session, Duration::from_secs(5));
        assert!(scheduler.is_active(1, "ns=1;s=Level"));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(receiver.try_recv().is_none());

        tokio::time::sleep(Duration::from_millis(5_200)).await;
        assert_eq!(std::iter::from_fn(|| receiver.try_recv()).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_session_ends_heartbeats() {
        let (session, node) = fixture().await;
        let (sender, mut receiver) = record_queue(10, Arc::new(DiagnosticCounters::new()));
        let scheduler = HeartbeatScheduler::new(sender, CancellationToken::new());
        let binding = Arc::new(PointBinding::new("opc.tcp://plc:4840", "ns=1;s=Level", "urn:plc", 1000, "Level"));

        scheduler.start(7, binding, node, session, Duration::from_secs(1));
        assert_eq!(scheduler.stop_session(7), 1);
        assert_eq!(scheduler.active_count(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_zero_interval_ignored() {
        let (session, node) = fixture().await;
        let (sender, _receiver) = record_queue(10, Arc::new(DiagnosticCounters::new()));
        let scheduler = HeartbeatScheduler::new(sender, CancellationToken::new());
        let binding = Arc::new(PointBinding::new("opc.tcp://plc:4840", "ns=1;s=Level", "urn:plc", 1000, "Level"));

        scheduler.start(1, binding, node, session, Duration::ZERO);
        assert_eq!(scheduler.active_count(), 0);
    }
}
