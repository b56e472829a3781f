// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Frame publishers.
//!
//! A [`Publisher`] hands finished frames to a [`BrokerClient`] and keeps the
//! send counters and latency average up to date. Two strategies exist:
//!
//! - [`DirectPublisher`]: a failed send is counted and forgotten.
//! - [`StoreForwardPublisher`]: a failed send is written to a
//!   [`SpillStore`]; each later successful send also replays up to
//!   `drain_batch` spilled frames, oldest first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use ualink_core::{BrokerClient, DiagnosticCounters, GatewayResult};

use crate::metrics::PipelineMetrics;
use crate::spill::SpillStore;

// =============================================================================
// Publisher Trait
// =============================================================================

/// Sends frames to the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends a telemetry frame. Returns `true` if the broker accepted it.
    async fn send(&self, frame: &[u8]) -> bool;

    /// Sends a metadata message. Returns `true` if the broker accepted it.
    async fn send_metadata(&self, message: &[u8]) -> bool;

    /// Returns the strategy name for logging.
    fn strategy(&self) -> &'static str;
}

/// Publishes and folds the elapsed time into the latency average.
async fn timed_publish(
    client: &dyn BrokerClient,
    diagnostics: &DiagnosticCounters,
    frame: &[u8],
) -> (GatewayResult<()>, Duration) {
    let started = Instant::now();
    let result = client.publish(frame).await;
    let elapsed = started.elapsed();
    diagnostics.record_latency_ms(elapsed.as_secs_f64() * 1000.0);
    (result, elapsed)
}

// =============================================================================
// DirectPublisher
// =============================================================================

/// Fire-and-forget publisher.
pub struct DirectPublisher {
    client: Arc<dyn BrokerClient>,
    diagnostics: Arc<DiagnosticCounters>,
    metrics: PipelineMetrics,
}

impl DirectPublisher {
    /// Creates a direct publisher.
    pub fn new(
        client: Arc<dyn BrokerClient>,
        diagnostics: Arc<DiagnosticCounters>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            client,
            diagnostics,
            metrics,
        }
    }
}

#[async_trait]
impl Publisher for DirectPublisher {
    async fn send(&self, frame: &[u8]) -> bool {
        let (result, elapsed) = timed_publish(self.client.as_ref(), &self.diagnostics, frame).await;
        match result {
            Ok(()) => {
                self.diagnostics.record_sent(frame.len());
                self.metrics.record_sent(frame.len(), elapsed.as_secs_f64());
                true
            }
            Err(e) => {
                self.diagnostics.record_failed();
                self.metrics.record_failure(elapsed.as_secs_f64());
                warn!(broker = self.client.name(), error = %e, "Frame publish failed");
                false
            }
        }
    }

    async fn send_metadata(&self, message: &[u8]) -> bool {
        match self.client.publish_metadata(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(broker = self.client.name(), error = %e, "Metadata publish failed");
                false
            }
        }
    }

    fn strategy(&self) -> &'static str {
        "direct"
    }
}

// =============================================================================
// StoreForwardPublisher
// =============================================================================

/// Publisher that spills failed frames and replays them on recovery.
pub struct StoreForwardPublisher {
    client: Arc<dyn BrokerClient>,
    spill: SpillStore,
    drain_batch: usize,
    diagnostics: Arc<DiagnosticCounters>,
    metrics: PipelineMetrics,
}

impl StoreForwardPublisher {
    /// Creates a store-and-forward publisher.
    ///
    /// `drain_batch` spilled frames are replayed after every successful send;
    /// zero is raised to one.
    pub fn new(
        client: Arc<dyn BrokerClient>,
        spill: SpillStore,
        drain_batch: usize,
        diagnostics: Arc<DiagnosticCounters>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            client,
            spill,
            drain_batch: drain_batch.max(1),
            diagnostics,
            metrics,
        }
    }

    /// Returns the spill store.
    pub fn spill(&self) -> &SpillStore {
        &self.spill
    }

    /// Replays up to `drain_batch` spilled frames. Stops at the first failure.
    async fn drain(&self) {
        for _ in 0..self.drain_batch {
            let path = match self.spill.oldest().await {
                Ok(Some(path)) => path,
                Ok(None) => return,
                Err(e) => {
                    error!(error = %e, "Cannot list spilled frames");
                    return;
                }
            };

            let frame = match self.spill.read(&path).await {
                Ok(frame) => frame,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Cannot read spilled frame");
                    return;
                }
            };

            if let Err(e) = self.client.publish(&frame).await {
                warn!(path = %path.display(), error = %e, "Spilled frame replay failed, will retry");
                return;
            }

            if let Err(e) = self.spill.remove(&path).await {
                error!(path = %path.display(), error = %e, "Cannot delete replayed frame");
            }
            self.diagnostics.record_replayed(frame.len());
            self.metrics.record_replayed(frame.len());
            debug!(path = %path.display(), bytes = frame.len(), "Spilled frame replayed");
        }
    }
}

#[async_trait]
impl Publisher for StoreForwardPublisher {
    async fn send(&self, frame: &[u8]) -> bool {
        let (result, elapsed) = timed_publish(self.client.as_ref(), &self.diagnostics, frame).await;
        match result {
            Ok(()) => {
                self.diagnostics.record_sent(frame.len());
                self.metrics.record_sent(frame.len(), elapsed.as_secs_f64());
                self.drain().await;
                true
            }
            Err(e) => {
                self.diagnostics.record_failed();
                self.metrics.record_failure(elapsed.as_secs_f64());
                warn!(broker = self.client.name(), error = %e, "Frame publish failed, spilling");

                match self.spill.store(frame).await {
                    Ok(_) => self.metrics.record_spilled(),
                    Err(e) => error!(error = %e, "Cannot spill frame, frame lost"),
                }
                false
            }
        }
    }

    async fn send_metadata(&self, message: &[u8]) -> bool {
        match self.client.publish_metadata(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(broker = self.client.name(), error = %e, "Metadata publish failed");
                false
            }
        }
    }

    fn strategy(&self) -> &'static str {
        "store_forward"
    }
}

// =============================================================================
// Tests
// =============================================================================
