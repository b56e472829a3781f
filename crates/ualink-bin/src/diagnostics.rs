// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Periodic diagnostics reporting.
//!
//! Every tick the reporter logs a counter summary and, if enabled, publishes
//! a `ua-status` message. Every [`SELF_RECORD_EVERY`] ticks it also enqueues
//! the gateway's own counters as telemetry records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ualink_buffer::MessageEncoder;
use ualink_core::{
    writer_id, BrokerClient, DataValue, GatewayContext, MessageRecord, RecordPayload, RecordSender,
    Variant,
};

/// Namespace of the self-diagnostic node ids.
pub const SELF_DIAGNOSTICS_NAMESPACE: &str = "http://opcfoundation.org/UA/CloudPublisher/";

/// Ticks between two rounds of self-diagnostic records.
pub const SELF_RECORD_EVERY: u64 = 10;

/// Periodic diagnostics task.
pub struct DiagnosticsReporter {
    ctx: GatewayContext,
    sender: RecordSender,
    encoder: Arc<dyn MessageEncoder>,
    client: Arc<dyn BrokerClient>,
    self_records: bool,
    ticks: u64,
    last_round: Option<RoundMark>,
}

#[derive(Debug, Clone, Copy)]
struct RoundMark {
    at: Instant,
    sent_messages: u64,
    enqueued: u64,
}

impl DiagnosticsReporter {
    /// Creates a reporter.
    pub fn new(
        ctx: GatewayContext,
        sender: RecordSender,
        encoder: Arc<dyn MessageEncoder>,
        client: Arc<dyn BrokerClient>,
        self_records: bool,
    ) -> Self {
        Self {
            ctx,
            sender,
            encoder,
            client,
            self_records,
            ticks: 0,
            last_round: None,
        }
    }

    /// Spawns the reporting loop.
    pub fn start(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.interval();
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval = %humantime::format_duration(interval),
                status = self.ctx.settings().send_status,
                self_records = self.self_records,
                "Diagnostics reporter started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.tick().await,
                }
            }

            info!(ticks = self.ticks, "Diagnostics reporter stopped");
        })
    }

    fn interval(&self) -> Duration {
        self.ctx
            .settings()
            .diagnostics_interval
            .max(Duration::from_millis(1))
    }

    /// Runs one reporting round.
    pub async fn tick(&mut self) {
        self.ticks += 1;
        let info = self.ctx.diagnostics().snapshot();

        info!(
            connected = info.connected_to_broker,
            sessions = info.number_of_opc_sessions_connected,
            subscriptions = info.number_of_opc_subscriptions_connected,
            monitored_items = info.number_of_opc_monitored_items_monitored,
            queued = info.monitored_items_queue_count,
            enqueue_failures = info.enqueue_failure_count,
            sent_messages = info.sent_messages,
            sent_bytes = info.sent_bytes,
            failed = info.failed_messages,
            too_large = info.too_large_count,
            latency_ms = info.average_message_latency,
            "Diagnostics"
        );

        if self.ctx.settings().send_status {
            self.publish_status().await;
        }

        if self.self_records && self.ticks % SELF_RECORD_EVERY == 0 {
            let records = self.self_records(Instant::now());
            let total = records.len();
            let accepted = records
                .into_iter()
                .filter_map(|record| self.sender.try_enqueue(record).then_some(()))
                .count();
            debug!(accepted, total, "Self-diagnostic records enqueued");
        }
    }

    async fn publish_status(&self) {
        let next = Utc::now()
            + chrono::Duration::from_std(self.interval()).unwrap_or_else(|_| chrono::Duration::zero());
        let message = match self.encoder.encode_status(next) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Cannot encode status message");
                return;
            }
        };
        if let Err(e) = self.client.publish(message.as_bytes()).await {
            warn!(broker = self.client.name(), error = %e, "Status publish failed");
        }
    }

    /// Builds the self-diagnostic records and moves the rate baseline to `now`.
    pub fn self_records(&mut self, now: Instant) -> Vec<MessageRecord> {
        let settings = self.ctx.settings();
        let diagnostics = self.ctx.diagnostics();
        let info = diagnostics.snapshot();

        let mark = RoundMark {
            at: now,
            sent_messages: info.sent_messages,
            enqueued: info.enqueue_count,
        };
        let (messages_per_second, items_per_second) = match self.last_round {
            Some(previous) => {
                let elapsed = now.saturating_duration_since(previous.at).as_secs_f64();
                if elapsed > 0.0 {
                    (
                        mark.sent_messages.saturating_sub(previous.sent_messages) as f64 / elapsed,
                        mark.enqueued.saturating_sub(previous.enqueued) as f64 / elapsed,
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            None => (0.0, 0.0),
        };
        self.last_round = Some(mark);

        let values = [
            ("ConnectedToBroker", Variant::Boolean(info.connected_to_broker)),
            ("NumOpcSessions", Variant::Int64(info.number_of_opc_sessions_connected)),
            ("NumOpcSubscriptions", Variant::Int64(info.number_of_opc_subscriptions_connected)),
            ("NumOpcMonitoredItems", Variant::Int64(info.number_of_opc_monitored_items_monitored)),
            ("QueueCapacity", Variant::UInt64(settings.queue_capacity as u64)),
            ("QueueCount", Variant::UInt64(self.sender.len() as u64)),
            ("EnqueueFailures", Variant::UInt64(info.enqueue_failure_count)),
            ("SentMessages", Variant::UInt64(info.sent_messages)),
            ("BrokerMessageSize", Variant::UInt64(settings.broker_message_size as u64)),
            ("BrokerMessageLatency", Variant::Double(info.average_message_latency)),
            ("BrokerMessagesSecond", Variant::Double(messages_per_second)),
            ("NumOpcMonitoredItemsSecond", Variant::Double(items_per_second)),
            ("BrokerMessageSendFailures", Variant::Int64(info.failed_messages)),
        ];

        let interval_ms = u32::try_from(self.interval().as_millis()).unwrap_or(u32::MAX);
        let writer = writer_id(&settings.application_uri, interval_ms);
        let timestamp = Utc::now();

        values
            .into_iter()
            .map(|(name, value)| MessageRecord {
                endpoint_url: String::new(),
                node_id: format!("nsu={};s={}", SELF_DIAGNOSTICS_NAMESPACE, name),
                application_uri: settings.application_uri.clone(),
                writer_id: writer.clone(),
                display_name: name.to_string(),
                payload: RecordPayload::Value(DataValue::good(value)),
                timestamp,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ualink_broker::MemoryBrokerClient;
    use ualink_buffer::PubSubJsonEncoder;
    use ualink_core::{record_queue, GatewaySettings};

    fn reporter(settings: GatewaySettings, self_records: bool) -> (DiagnosticsReporter, Arc<MemoryBrokerClient>, ualink_core::RecordReceiver) {
        let ctx = GatewayContext::new(settings);
        let (sender, receiver) = record_queue(100, ctx.diagnostics().clone());
        let client = Arc::new(MemoryBrokerClient::new());
        let reporter = DiagnosticsReporter::new(
            ctx,
            sender,
            Arc::new(PubSubJsonEncoder::new("test-publisher")),
            client.clone(),
            self_records,
        );
        (reporter, client, receiver)
    }

    #[test]
    fn test_self_records_cover_every_counter() {
        let (mut reporter, _, _) = reporter(GatewaySettings::for_testing(), true);
        let records = reporter.self_records(Instant::now());

        assert_eq!(records.len(), 13);
        assert!(records.iter().all(|r| r.node_id.starts_with("nsu=http://opcfoundation.org/UA/CloudPublisher/;s=")));
        assert!(records.iter().any(|r| r.display_name == "BrokerMessagesSecond"));
    }

    #[test]
    fn test_rates_derived_between_rounds() {
        let (mut reporter, _, _) = reporter(GatewaySettings::for_testing(), true);
        let start = Instant::now();
        reporter.self_records(start);

        for _ in 0..20 {
            reporter.ctx.diagnostics().record_sent(10);
        }
        let records = reporter.self_records(start + Duration::from_secs(10));

        let rate = records
            .iter()
            .find(|r| r.display_name == "BrokerMessagesSecond")
            .map(|r| r.payload.clone())
            .unwrap();
        match rate {
            RecordPayload::Value(v) => assert_eq!(v.value, Variant::Double(2.0)),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_every_tenth_tick_enqueues() {
        let (mut reporter, _, mut receiver) = reporter(GatewaySettings::for_testing(), true);

        for _ in 0..9 {
            reporter.tick().await;
        }
        assert!(receiver.try_recv().is_none());

        reporter.tick().await;
        let mut count = 0;
        while receiver.try_recv().is_some() {
            count += 1;
        }
        assert_eq!(count, 13);
    }

    #[tokio::test]
    async fn test_status_published_when_enabled() {
        let mut settings = GatewaySettings::for_testing();
        settings.send_status = true;
        let (mut reporter, client, _) = reporter(settings, false);
        client.connect().await.unwrap();

        reporter.tick().await;

        let messages = client.messages();
        assert_eq!(messages.len(), 1);
        let status: serde_json::Value = serde_json::from_slice(&messages[0]).unwrap();
        assert_eq!(status["MessageType"], "ua-status");
        assert_eq!(status["Status"], "Operational");
    }
}
