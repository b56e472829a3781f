// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The batching engine.
//!
//! A single consumer drains the record queue and assembles frames:
//!
//! - **Immediate mode** (send interval and message size both zero): every
//!   record is sent as its own frame.
//! - **Batched mode**: records are appended until the next one would push the
//!   frame past its byte budget, or until the send deadline passes with a
//!   non-empty frame.
//!
//! Event records close the frame they land in right away.
//!
//! # Waiting
//!
//! The queue pull waits `max(0, deadline - now)`. A deadline found already
//! in the past counts as a missed send interval. An expired deadline with an
//! empty frame moves forward by one interval without sending anything.
//!
//! # Shutdown
//!
//! On cancellation the engine processes the records already visible in the
//! queue and exits. A frame still open at that point is not sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ualink_core::{
    DiagnosticCounters, GatewayContext, MessageRecord, RecordReceiver,
};

use crate::encoder::MessageEncoder;
use crate::frame::FrameBuilder;
use crate::metrics::PipelineMetrics;
use crate::publisher::Publisher;

// =============================================================================
// Configuration
// =============================================================================

/// Batching parameters.
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// Send interval. Zero disables the timer.
    pub send_interval: Duration,
    /// Maximum broker message size. Zero disables batching by size.
    pub message_size: usize,
    /// Byte budget for one frame.
    pub frame_budget: usize,
    /// Send dataset metadata for each new writer and node.
    pub send_metadata: bool,
    /// Metadata resend period.
    pub metadata_interval: Duration,
}

impl BatchingConfig {
    /// Derives the batching parameters from the gateway settings.
    pub fn from_context(ctx: &GatewayContext) -> Self {
        let settings = ctx.settings();
        Self {
            send_interval: settings.send_interval,
            message_size: settings.broker_message_size,
            frame_budget: settings.frame_budget(),
            send_metadata: settings.send_metadata,
            metadata_interval: settings.metadata_interval,
        }
    }

    /// Returns `true` when every record becomes its own frame.
    pub fn immediate_mode(&self) -> bool {
        self.send_interval.is_zero() && self.message_size == 0
    }
}

// =============================================================================
// BatchingEngine
// =============================================================================

enum Step {
    Record(MessageRecord),
    DeadlineReached,
    MetadataTick,
    Cancelled,
    Closed,
}

struct CachedMetadata {
    record: MessageRecord,
    field_id: Uuid,
}

/// Single consumer turning queued records into frames.
pub struct BatchingEngine {
    config: BatchingConfig,
    receiver: RecordReceiver,
    encoder: Arc<dyn MessageEncoder>,
    publisher: Arc<dyn Publisher>,
    diagnostics: Arc<DiagnosticCounters>,
    metrics: PipelineMetrics,
    cancel: CancellationToken,
    frame: FrameBuilder,
    deadline: Instant,
    metadata: HashMap<(String, String), CachedMetadata>,
}

impl BatchingEngine {
    /// Creates an engine draining `receiver`.
    pub fn new(
        ctx: &GatewayContext,
        receiver: RecordReceiver,
        encoder: Arc<dyn MessageEncoder>,
        publisher: Arc<dyn Publisher>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self::with_config(
            BatchingConfig::from_context(ctx),
            ctx.diagnostics().clone(),
            ctx.child_token(),
            receiver,
            encoder,
            publisher,
            metrics,
        )
    }

    /// Creates an engine with explicit parameters.
    pub fn with_config(
        config: BatchingConfig,
        diagnostics: Arc<DiagnosticCounters>,
        cancel: CancellationToken,
        receiver: RecordReceiver,
        encoder: Arc<dyn MessageEncoder>,
        publisher: Arc<dyn Publisher>,
        metrics: PipelineMetrics,
    ) -> Self {
        let frame = FrameBuilder::new(config.frame_budget);
        let deadline = Instant::now() + config.send_interval;
        Self {
            config,
            receiver,
            encoder,
            publisher,
            diagnostics,
            metrics,
            cancel,
            frame,
            deadline,
            metadata: HashMap::new(),
        }
    }

    /// Spawns the engine on the runtime.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs the engine until cancelled or until every sender is dropped.
    pub async fn run(mut self) {
        info!(
            interval_ms = self.config.send_interval.as_millis() as u64,
            budget = self.config.frame_budget,
            immediate = self.config.immediate_mode(),
            publisher = self.publisher.strategy(),
            "Batching engine started"
        );

        let cancel = self.cancel.clone();
        let mut metadata_timer = tokio::time::interval_at(
            Instant::now() + self.config.metadata_interval,
            self.config.metadata_interval.max(Duration::from_millis(1)),
        );
        self.deadline = Instant::now() + self.config.send_interval;

        loop {
            let wait = self.compute_wait();
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                _ = metadata_timer.tick(), if self.config.send_metadata => Step::MetadataTick,
                step = Self::pull(&mut self.receiver, wait) => step,
            };

            match step {
                Step::Record(record) => self.handle_record(record).await,
                Step::DeadlineReached => self.on_deadline().await,
                Step::MetadataTick => self.resend_metadata().await,
                Step::Cancelled => {
                    self.drain_visible().await;
                    break;
                }
                Step::Closed => break,
            }
        }

        let discarded = self.frame.discard();
        if discarded > 0 {
            warn!(discarded, "Batching engine stopped with an unsent frame");
        }
        info!("Batching engine stopped");
    }

    /// Returns how long the next pull may wait. `None` waits indefinitely.
    fn compute_wait(&mut self) -> Option<Duration> {
        if self.config.send_interval.is_zero() {
            return None;
        }
        let now = Instant::now();
        if now > self.deadline {
            self.diagnostics.record_missed_interval();
            Some(Duration::ZERO)
        } else {
            Some(self.deadline - now)
        }
    }

    async fn pull(receiver: &mut RecordReceiver, wait: Option<Duration>) -> Step {
        match wait {
            None => receiver.recv().await.map_or(Step::Closed, Step::Record),
            Some(wait) => match tokio::time::timeout(wait, receiver.recv()).await {
                Ok(Some(record)) => Step::Record(record),
                Ok(None) => Step::Closed,
                Err(_) => Step::DeadlineReached,
            },
        }
    }

    async fn on_deadline(&mut self) {
        if self.frame.is_empty() {
            self.deadline += self.config.send_interval;
        } else {
            self.flush().await;
        }
    }

    async fn drain_visible(&mut self) {
        let mut drained = 0usize;
        while let Some(record) = self.receiver.try_recv() {
            self.handle_record(record).await;
            drained += 1;
        }
        debug!(drained, "Drained visible records on shutdown");
    }

    /// Encodes a record and adds it to the current frame.
    async fn handle_record(&mut self, record: MessageRecord) {
        if self.config.send_metadata {
            self.send_metadata_once(&record).await;
        }

        let encoded = match self.encoder.encode_record(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(node_id = %record.node_id, error = %e, "Record encoding failed");
                return;
            }
        };
        self.diagnostics.record_encoded();

        if encoded.len() > self.config.frame_budget {
            self.drop_too_large(&record, encoded.len());
            return;
        }

        let separator_len = self.encoder.record_separator().len();
        if !self.frame.is_started() {
            self.frame.begin(&self.encoder.encode_header());
        }
        if !self.frame.fits(encoded.len(), separator_len) {
            if self.frame.is_empty() {
                self.drop_too_large(&record, encoded.len());
                return;
            }
            self.flush().await;
            self.frame.begin(&self.encoder.encode_header());
            if !self.frame.fits(encoded.len(), separator_len) {
                self.drop_too_large(&record, encoded.len());
                return;
            }
        }

        self.frame.push(&encoded, self.encoder.record_separator());

        if self.config.immediate_mode() || record.is_event() {
            self.flush().await;
        }
    }

    fn drop_too_large(&self, record: &MessageRecord, size: usize) {
        self.diagnostics.record_too_large();
        self.metrics.record_too_large();
        warn!(
            node_id = %record.node_id,
            size,
            budget = self.config.frame_budget,
            "Record too large for a frame, dropped"
        );
    }

    /// Closes the current frame and hands it to the publisher.
    async fn flush(&mut self) {
        if self.frame.is_empty() {
            return;
        }
        let frame = self.frame.finish(self.encoder.frame_terminator());
        self.diagnostics
            .record_notifications_per_frame(frame.notifications);
        self.metrics.record_frame(frame.notifications);
        self.metrics.observe_counters(&self.diagnostics);

        debug!(
            notifications = frame.notifications,
            bytes = frame.len(),
            "Sending frame"
        );
        self.publisher.send(&frame.bytes).await;
        self.deadline = Instant::now() + self.config.send_interval;
    }

    async fn send_metadata_once(&mut self, record: &MessageRecord) {
        let key = (record.writer_id.clone(), record.node_id.clone());
        if self.metadata.contains_key(&key) {
            return;
        }
        let cached = CachedMetadata {
            record: record.clone(),
            field_id: Uuid::new_v4(),
        };
        self.publish_metadata(&cached).await;
        self.metadata.insert(key, cached);
    }

    async fn resend_metadata(&mut self) {
        debug!(writers = self.metadata.len(), "Resending dataset metadata");
        for cached in self.metadata.values() {
            self.publish_metadata(cached).await;
        }
    }

    async fn publish_metadata(&self, cached: &CachedMetadata) {
        match self.encoder.encode_metadata(&cached.record, cached.field_id) {
            Ok(message) => {
                self.publisher.send_metadata(message.as_bytes()).await;
            }
            Err(e) => warn!(node_id = %cached.record.node_id, error = %e, "Metadata encoding failed"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
