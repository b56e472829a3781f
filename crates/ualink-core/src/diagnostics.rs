// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway-wide diagnostic counters.
//!
//! One [`DiagnosticCounters`] instance lives in the [`GatewayContext`] and is
//! shared by every pipeline stage. Counters are lock-free atomics; the two
//! rolling averages hold their sample windows behind a short mutex.
//!
//! [`GatewayContext`]: crate::context::GatewayContext

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of samples kept by the rolling averages.
pub const ROLLING_WINDOW: usize = 100;

// =============================================================================
// RollingAverage
// =============================================================================

/// Average over the most recent samples.
#[derive(Debug)]
pub struct RollingAverage {
    window: usize,
    samples: Mutex<VecDeque<f64>>,
}

impl RollingAverage {
    /// Creates an empty average over `window` samples.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(VecDeque::with_capacity(window.max(1))),
        }
    }

    /// Adds a sample, evicting the oldest one once the window is full.
    pub fn add(&self, sample: f64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Returns the current average, `0.0` with no samples.
    pub fn average(&self) -> f64 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        }
    }

    /// Returns the number of samples held.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Returns `true` if no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self::new(ROLLING_WINDOW)
    }
}

// =============================================================================
// DiagnosticCounters
// =============================================================================

/// Counters updated by every pipeline stage.
#[derive(Debug)]
pub struct DiagnosticCounters {
    start_time: DateTime<Utc>,
    connected_to_broker: AtomicBool,

    sessions_connected: AtomicI64,
    subscriptions_connected: AtomicI64,
    monitored_items: AtomicI64,

    queue_count: AtomicI64,
    enqueue_count: AtomicU64,
    enqueue_failure_count: AtomicU64,

    number_of_events: AtomicU64,
    missed_send_interval_count: AtomicU64,
    too_large_count: AtomicU64,

    sent_bytes: AtomicU64,
    sent_messages: AtomicU64,
    sent_last_time: Mutex<Option<DateTime<Utc>>>,
    failed_messages: AtomicI64,

    message_latency: RollingAverage,
    notifications_per_message: RollingAverage,
}

impl DiagnosticCounters {
    /// Creates zeroed counters stamped with the current time.
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            connected_to_broker: AtomicBool::new(false),
            sessions_connected: AtomicI64::new(0),
            subscriptions_connected: AtomicI64::new(0),
            monitored_items: AtomicI64::new(0),
            queue_count: AtomicI64::new(0),
            enqueue_count: AtomicU64::new(0),
            enqueue_failure_count: AtomicU64::new(0),
            number_of_events: AtomicU64::new(0),
            missed_send_interval_count: AtomicU64::new(0),
            too_large_count: AtomicU64::new(0),
            sent_bytes: AtomicU64::new(0),
            sent_messages: AtomicU64::new(0),
            sent_last_time: Mutex::new(None),
            failed_messages: AtomicI64::new(0),
            message_latency: RollingAverage::default(),
            notifications_per_message: RollingAverage::default(),
        }
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Records a successful enqueue and the resulting queue length.
    pub fn record_enqueue(&self, queue_len: usize) {
        self.enqueue_count.fetch_add(1, Ordering::Relaxed);
        self.queue_count.store(queue_len as i64, Ordering::Relaxed);
    }

    /// Records a rejected enqueue. Returns the new failure total.
    pub fn record_enqueue_failure(&self) -> u64 {
        self.enqueue_failure_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Updates the observed queue length.
    pub fn set_queue_count(&self, queue_len: usize) {
        self.queue_count.store(queue_len as i64, Ordering::Relaxed);
    }

    // =========================================================================
    // Encoding & Batching
    // =========================================================================

    /// Records one encoded record.
    pub fn record_encoded(&self) {
        self.number_of_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a send deadline that had already passed.
    pub fn record_missed_interval(&self) {
        self.missed_send_interval_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a record dropped for exceeding the frame budget.
    pub fn record_too_large(&self) {
        self.too_large_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds the record count of a finished frame into the average.
    pub fn record_notifications_per_frame(&self, notifications: usize) {
        self.notifications_per_message.add(notifications as f64);
    }

    // =========================================================================
    // Broker
    // =========================================================================

    /// Records a successful publish of `bytes`.
    pub fn record_sent(&self, bytes: usize) {
        self.sent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.sent_messages.fetch_add(1, Ordering::Relaxed);
        *self.sent_last_time.lock() = Some(Utc::now());
    }

    /// Records a failed publish.
    pub fn record_failed(&self) {
        self.failed_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a spilled frame that was delivered on a later attempt.
    pub fn record_replayed(&self, bytes: usize) {
        self.failed_messages.fetch_sub(1, Ordering::Relaxed);
        self.record_sent(bytes);
    }

    /// Folds a publish latency into the average.
    pub fn record_latency_ms(&self, latency_ms: f64) {
        self.message_latency.add(latency_ms);
    }

    /// Sets the broker connection flag.
    pub fn set_broker_connected(&self, connected: bool) {
        self.connected_to_broker.store(connected, Ordering::Relaxed);
    }

    // =========================================================================
    // Source Pool
    // =========================================================================

    /// Publishes the current pool sizes.
    pub fn set_pool_counts(&self, sessions: usize, subscriptions: usize, monitored_items: usize) {
        self.sessions_connected.store(sessions as i64, Ordering::Relaxed);
        self.subscriptions_connected.store(subscriptions as i64, Ordering::Relaxed);
        self.monitored_items.store(monitored_items as i64, Ordering::Relaxed);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the broker connection flag.
    pub fn broker_connected(&self) -> bool {
        self.connected_to_broker.load(Ordering::Relaxed)
    }

    /// Returns the number of successful enqueues.
    pub fn enqueue_count(&self) -> u64 {
        self.enqueue_count.load(Ordering::Relaxed)
    }

    /// Returns the number of rejected enqueues.
    pub fn enqueue_failure_count(&self) -> u64 {
        self.enqueue_failure_count.load(Ordering::Relaxed)
    }

    /// Returns the number of records dropped as too large.
    pub fn too_large_count(&self) -> u64 {
        self.too_large_count.load(Ordering::Relaxed)
    }

    /// Returns the number of missed send deadlines.
    pub fn missed_send_interval_count(&self) -> u64 {
        self.missed_send_interval_count.load(Ordering::Relaxed)
    }

    /// Returns the number of encoded records.
    pub fn number_of_events(&self) -> u64 {
        self.number_of_events.load(Ordering::Relaxed)
    }

    /// Returns the number of published messages.
    pub fn sent_messages(&self) -> u64 {
        self.sent_messages.load(Ordering::Relaxed)
    }

    /// Returns the number of published bytes.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Relaxed)
    }

    /// Returns the number of failed publishes not yet recovered.
    pub fn failed_messages(&self) -> i64 {
        self.failed_messages.load(Ordering::Relaxed)
    }

    /// Returns the rolling average publish latency in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        self.message_latency.average()
    }

    /// Returns the rolling average of records per frame.
    pub fn average_notifications_per_frame(&self) -> f64 {
        self.notifications_per_message.average()
    }

    /// Returns the number of monitored items in the pool.
    pub fn monitored_items(&self) -> i64 {
        self.monitored_items.load(Ordering::Relaxed)
    }

    /// Takes a consistent-enough copy of all counters.
    pub fn snapshot(&self) -> DiagnosticsInfo {
        DiagnosticsInfo {
            publisher_start_time: self.start_time,
            connected_to_broker: self.broker_connected(),
            number_of_opc_sessions_connected: self.sessions_connected.load(Ordering::Relaxed),
            number_of_opc_subscriptions_connected: self
                .subscriptions_connected
                .load(Ordering::Relaxed),
            number_of_opc_monitored_items_monitored: self.monitored_items(),
            monitored_items_queue_count: self.queue_count.load(Ordering::Relaxed),
            enqueue_count: self.enqueue_count(),
            enqueue_failure_count: self.enqueue_failure_count(),
            number_of_events: self.number_of_events(),
            missed_send_interval_count: self.missed_send_interval_count(),
            too_large_count: self.too_large_count(),
            sent_bytes: self.sent_bytes(),
            sent_messages: self.sent_messages(),
            sent_last_time: *self.sent_last_time.lock(),
            failed_messages: self.failed_messages(),
            average_message_latency: self.average_latency_ms(),
            average_notifications_in_broker_message: self.average_notifications_per_frame(),
        }
    }
}

impl Default for DiagnosticCounters {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// DiagnosticsInfo
// =============================================================================

/// Serializable counter snapshot, returned by `GetInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsInfo {
    /// Process start time.
    pub publisher_start_time: DateTime<Utc>,
    /// Whether the broker connection is up.
    pub connected_to_broker: bool,
    /// Sessions in the pool.
    pub number_of_opc_sessions_connected: i64,
    /// Subscriptions in the pool.
    pub number_of_opc_subscriptions_connected: i64,
    /// Monitored items in the pool.
    pub number_of_opc_monitored_items_monitored: i64,
    /// Records waiting in the queue.
    pub monitored_items_queue_count: i64,
    /// Successful enqueues.
    pub enqueue_count: u64,
    /// Rejected enqueues.
    pub enqueue_failure_count: u64,
    /// Encoded records.
    pub number_of_events: u64,
    /// Send deadlines that had already passed.
    pub missed_send_interval_count: u64,
    /// Records dropped as too large.
    pub too_large_count: u64,
    /// Bytes published.
    pub sent_bytes: u64,
    /// Messages published.
    pub sent_messages: u64,
    /// Time of the last successful publish.
    pub sent_last_time: Option<DateTime<Utc>>,
    /// Failed publishes not yet recovered.
    pub failed_messages: i64,
    /// Rolling average publish latency in milliseconds.
    pub average_message_latency: f64,
    /// Rolling average of records per frame.
    pub average_notifications_in_broker_message: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average_window() {
        let avg = RollingAverage::new(3);
        for sample in [1.0, 2.0, 3.0, 10.0] {
            avg.add(sample);
        }
        assert_eq!(avg.len(), 3);
        assert!((avg.average() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rolling_average_empty() {
        assert_eq!(RollingAverage::default().average(), 0.0);
    }

    #[test]
    fn test_replay_moves_failed_to_sent() {
        let counters = DiagnosticCounters::new();
        counters.record_failed();
        counters.record_sent(100);
        counters.record_replayed(50);

        assert_eq!(counters.failed_messages(), 0);
        assert_eq!(counters.sent_messages(), 2);
        assert_eq!(counters.sent_bytes(), 150);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let counters = DiagnosticCounters::new();
        counters.set_pool_counts(1, 2, 3);
        let json = serde_json::to_value(counters.snapshot()).unwrap();

        assert_eq!(json["numberOfOpcSessionsConnected"], 1);
        assert_eq!(json["numberOfOpcMonitoredItemsMonitored"], 3);
        assert!(json.get("averageNotificationsInBrokerMessage").is_some());
    }
}
