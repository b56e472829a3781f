// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Prometheus metrics for the publishing pipeline.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `ualink_frames_sent_total` | Counter | Frames accepted by the broker |
//! | `ualink_frame_bytes_sent_total` | Counter | Bytes accepted by the broker |
//! | `ualink_frame_send_failures_total` | Counter | Failed publishes |
//! | `ualink_records_too_large_total` | Counter | Records dropped for size |
//! | `ualink_spill_written_total` | Counter | Frames spilled to disk |
//! | `ualink_spill_replayed_total` | Counter | Spilled frames delivered |
//! | `ualink_records_enqueued_total` | Counter | Records accepted by the queue |
//! | `ualink_enqueue_failures_total` | Counter | Records rejected by a full queue |
//! | `ualink_published_points` | Gauge | Monitored items across all sessions |
//! | `ualink_frame_records` | Histogram | Records per frame |
//! | `ualink_send_latency_seconds` | Histogram | Publish latency |
//!
//! Metrics live on the registry of the gateway context, so two gateways in
//! one process (as in tests) never collide.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use tracing::warn;
use ualink_core::DiagnosticCounters;

#[derive(Debug)]
struct Inner {
    frames_sent: IntCounter,
    bytes_sent: IntCounter,
    send_failures: IntCounter,
    records_too_large: IntCounter,
    spill_written: IntCounter,
    spill_replayed: IntCounter,
    records_enqueued: IntCounter,
    enqueue_failures: IntCounter,
    published_points: IntGauge,
    frame_records: Histogram,
    send_latency: Histogram,
    seen_enqueued: AtomicU64,
    seen_enqueue_failures: AtomicU64,
}

impl Inner {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let inner = Self {
            frames_sent: IntCounter::new(
                "ualink_frames_sent_total",
                "Total number of frames accepted by the broker",
            )?,
            bytes_sent: IntCounter::new(
                "ualink_frame_bytes_sent_total",
                "Total number of frame bytes accepted by the broker",
            )?,
            send_failures: IntCounter::new(
                "ualink_frame_send_failures_total",
                "Total number of failed frame publishes",
            )?,
            records_too_large: IntCounter::new(
                "ualink_records_too_large_total",
                "Total number of records dropped for exceeding the frame budget",
            )?,
            spill_written: IntCounter::new(
                "ualink_spill_written_total",
                "Total number of frames written to the spill directory",
            )?,
            spill_replayed: IntCounter::new(
                "ualink_spill_replayed_total",
                "Total number of spilled frames delivered on a later send",
            )?,
            records_enqueued: IntCounter::new(
                "ualink_records_enqueued_total",
                "Total number of records accepted by the record queue",
            )?,
            enqueue_failures: IntCounter::new(
                "ualink_enqueue_failures_total",
                "Total number of records rejected by a full record queue",
            )?,
            published_points: IntGauge::new(
                "ualink_published_points",
                "Number of monitored items across all source sessions",
            )?,
            frame_records: Histogram::with_opts(
                HistogramOpts::new("ualink_frame_records", "Number of records per frame")
                    .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
            )?,
            send_latency: Histogram::with_opts(
                HistogramOpts::new("ualink_send_latency_seconds", "Latency of broker publishes")
                    .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            )?,
            seen_enqueued: AtomicU64::new(0),
            seen_enqueue_failures: AtomicU64::new(0),
        };

        registry.register(Box::new(inner.frames_sent.clone()))?;
        registry.register(Box::new(inner.bytes_sent.clone()))?;
        registry.register(Box::new(inner.send_failures.clone()))?;
        registry.register(Box::new(inner.records_too_large.clone()))?;
        registry.register(Box::new(inner.spill_written.clone()))?;
        registry.register(Box::new(inner.spill_replayed.clone()))?;
        registry.register(Box::new(inner.records_enqueued.clone()))?;
        registry.register(Box::new(inner.enqueue_failures.clone()))?;
        registry.register(Box::new(inner.published_points.clone()))?;
        registry.register(Box::new(inner.frame_records.clone()))?;
        registry.register(Box::new(inner.send_latency.clone()))?;

        Ok(inner)
    }
}

/// Records pipeline metrics.
///
/// A collector whose registration failed stays usable and records nothing.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    inner: Option<Arc<Inner>>,
}

impl PipelineMetrics {
    /// Registers the pipeline metrics on `registry`.
    pub fn new(registry: &Registry) -> Self {
        match Inner::register(registry) {
            Ok(inner) => Self {
                inner: Some(Arc::new(inner)),
            },
            Err(e) => {
                warn!(error = %e, "Pipeline metrics disabled");
                Self::disabled()
            }
        }
    }

    /// Creates a collector that records nothing.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Returns `true` if metrics are recorded.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Records a delivered frame.
    pub fn record_sent(&self, bytes: usize, latency_secs: f64) {
        if let Some(inner) = &self.inner {
            inner.frames_sent.inc();
            inner.bytes_sent.inc_by(bytes as u64);
            inner.send_latency.observe(latency_secs);
        }
    }

    /// Records a failed publish.
    pub fn record_failure(&self, latency_secs: f64) {
        if let Some(inner) = &self.inner {
            inner.send_failures.inc();
            inner.send_latency.observe(latency_secs);
        }
    }

    /// Records a record dropped for size.
    pub fn record_too_large(&self) {
        if let Some(inner) = &self.inner {
            inner.records_too_large.inc();
        }
    }

    /// Records a closed frame.
    pub fn record_frame(&self, notifications: usize) {
        if let Some(inner) = &self.inner {
            inner.frame_records.observe(notifications as f64);
        }
    }

    /// Records a frame written to the spill directory.
    pub fn record_spilled(&self) {
        if let Some(inner) = &self.inner {
            inner.spill_written.inc();
        }
    }

    /// Records a spilled frame delivered.
    pub fn record_replayed(&self, bytes: usize) {
        if let Some(inner) = &self.inner {
            inner.spill_replayed.inc();
            inner.frames_sent.inc();
            inner.bytes_sent.inc_by(bytes as u64);
        }
    }

    /// Copies the queue and pool figures kept by the diagnostic counters.
    ///
    /// The queue counters live in `ualink-core`, so they are carried over
    /// as deltas since the previous call.
    pub fn observe_counters(&self, diagnostics: &DiagnosticCounters) {
        if let Some(inner) = &self.inner {
            let enqueued = diagnostics.enqueue_count();
            let previous = inner.seen_enqueued.swap(enqueued, Ordering::Relaxed);
            inner.records_enqueued.inc_by(enqueued.saturating_sub(previous));

            let failures = diagnostics.enqueue_failure_count();
            let previous = inner.seen_enqueue_failures.swap(failures, Ordering::Relaxed);
            inner.enqueue_failures.inc_by(failures.saturating_sub(previous));

            inner.published_points.set(diagnostics.monitored_items());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_on_registry() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new(&registry);
        assert!(metrics.is_enabled());

        metrics.record_sent(128, 0.01);
        metrics.record_too_large();

        let families = registry.gather();
        let sent = families
            .iter()
            .find(|f| f.get_name() == "ualink_frames_sent_total")
            .unwrap();
        assert_eq!(sent.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[test]
    fn test_observe_counters_carries_deltas() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new(&registry);
        let diagnostics = DiagnosticCounters::new();

        diagnostics.record_enqueue(1);
        diagnostics.record_enqueue(2);
        diagnostics.record_enqueue_failure();
        diagnostics.set_pool_counts(1, 1, 4);
        metrics.observe_counters(&diagnostics);
        diagnostics.record_enqueue(1);
        metrics.observe_counters(&diagnostics);

        let families = registry.gather();
        let value = |name: &str| {
            families
                .iter()
                .find(|f| f.get_name() == name)
                .map(|f| &f.get_metric()[0])
                .unwrap()
                .clone()
        };
        assert_eq!(value("ualink_records_enqueued_total").get_counter().get_value(), 3.0);
        assert_eq!(value("ualink_enqueue_failures_total").get_counter().get_value(), 1.0);
        assert_eq!(value("ualink_published_points").get_gauge().get_value(), 4.0);
    }

    #[test]
    fn test_duplicate_registration_disables() {
        let registry = Registry::new();
        let _first = PipelineMetrics::new(&registry);
        let second = PipelineMetrics::new(&registry);
        assert!(!second.is_enabled());
        second.record_sent(1, 0.0);
    }
}
