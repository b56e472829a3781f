// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command/response handling on the broker channel.
//!
//! The [`CommandDispatcher`] drains the inbound channel filled by the broker
//! client, routes each message to a [`CommandKind`] and publishes the result
//! as a [`ResponseEnvelope`].
//!
//! # Flow
//!
//! ```text
//! InboundMessage
//!     │ parse {correlationId, timestamp}
//!     │ older than the staleness window? ──► discarded, no response
//!     ▼
//! CommandKind (topic suffix, else "command" field)
//!     │ unknown ──► success=false naming the topic
//!     ▼
//! CommandHandler::handle
//!     ▼
//! {responseTopic}/{200|500}/{correlationId}
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ualink_core::{BrokerClient, CommandHandler, CommandKind, CommandOutcome, InboundMessage};

/// Default age after which a command is discarded.
pub const DEFAULT_COMMAND_STALENESS: Duration = Duration::from_secs(15);

/// Response status code for a successful command.
pub const STATUS_OK: u16 = 200;

/// Response status code for a failed command.
pub const STATUS_FAILED: u16 = 500;

// =============================================================================
// Envelopes
// =============================================================================

/// Fields common to every inbound command.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Correlation id echoed in the response.
    #[serde(default)]
    pub correlation_id: String,
    /// Time the command was issued.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Command name, used when the topic carries none.
    #[serde(default)]
    pub command: Option<String>,
}

/// Response published for every handled command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Correlation id of the request.
    pub correlation_id: String,
    /// Time the response was built.
    pub timestamp: DateTime<Utc>,
    /// Whether the command succeeded.
    pub success: bool,
    /// Status text or serialized result.
    pub status: String,
}

impl ResponseEnvelope {
    /// Wraps a command outcome.
    pub fn new(correlation_id: impl Into<String>, outcome: CommandOutcome) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            success: outcome.success,
            status: outcome.status,
        }
    }

    /// Returns the response status code.
    pub fn status_code(&self) -> u16 {
        if self.success {
            STATUS_OK
        } else {
            STATUS_FAILED
        }
    }

    /// Returns `{prefix}/{status_code}/{correlation_id}`.
    pub fn topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}",
            prefix.trim_end_matches('/'),
            self.status_code(),
            self.correlation_id
        )
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Command topic filter, optionally ending in `#`.
    pub command_topic: String,
    /// Prefix of the response topics.
    pub response_topic: String,
    /// Age after which a command is discarded.
    pub staleness: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_topic: String::new(),
            response_topic: "response".to_string(),
            staleness: DEFAULT_COMMAND_STALENESS,
        }
    }
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A response was built and handed to the broker.
    Responded(ResponseEnvelope),
    /// The message was too old or carried no timestamp.
    Discarded,
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl DispatcherStats {
    /// Returns `(received, succeeded, failed, discarded)`.
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.received.load(Ordering::Relaxed),
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.discarded.load(Ordering::Relaxed),
        )
    }
}

/// Routes inbound commands to a [`CommandHandler`] and publishes responses.
pub struct CommandDispatcher {
    config: DispatcherConfig,
    handler: Arc<dyn CommandHandler>,
    client: Arc<dyn BrokerClient>,
    stats: Arc<DispatcherStats>,
}

impl CommandDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        config: DispatcherConfig,
        handler: Arc<dyn CommandHandler>,
        client: Arc<dyn BrokerClient>,
    ) -> Self {
        Self {
            config,
            handler,
            client,
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    /// Returns the shared counters.
    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    /// Handles one inbound message.
    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        info!(topic = %message.topic, bytes = message.payload.len(), "Received command");

        let envelope = match serde_json::from_slice::<RequestEnvelope>(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Malformed command payload");
                let outcome = CommandOutcome::failure(format!("Malformed command payload: {}", e));
                return self.respond(ResponseEnvelope::new("", outcome)).await;
            }
        };

        if self.is_stale(envelope.timestamp) {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            info!(
                topic = %message.topic,
                timestamp = ?envelope.timestamp,
                "Discarding stale command"
            );
            return DispatchOutcome::Discarded;
        }

        let kind = CommandKind::from_topic(&self.config.command_topic, &message.topic).or_else(|| {
            envelope
                .command
                .as_deref()
                .and_then(|name| name.parse::<CommandKind>().ok())
        });

        let outcome = match kind {
            Some(kind) => match self.handler.handle(kind, &message.payload).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(command = %kind, error = %e, "Command failed");
                    CommandOutcome::failure(e.user_message())
                }
            },
            None => {
                let name = envelope.command.as_deref().unwrap_or(&message.topic);
                error!(topic = %message.topic, command = %name, "Unknown command received");
                CommandOutcome::failure(format!("Unknown command {}", name))
            }
        };

        self.respond(ResponseEnvelope::new(envelope.correlation_id, outcome))
            .await
    }

    fn is_stale(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        let Some(timestamp) = timestamp else {
            return true;
        };
        let window = chrono::Duration::from_std(self.config.staleness)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        timestamp < Utc::now() - window
    }

    async fn respond(&self, response: ResponseEnvelope) -> DispatchOutcome {
        if response.success {
            self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }

        let topic = response.topic(&self.config.response_topic);
        match serde_json::to_vec(&response) {
            Ok(payload) => {
                if let Err(e) = self.client.publish_response(&topic, &payload).await {
                    warn!(topic = %topic, error = %e, "Failed to publish command response");
                } else {
                    debug!(topic = %topic, success = response.success, "Command response sent");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize command response"),
        }
        DispatchOutcome::Responded(response)
    }

    /// Spawns the dispatch loop.
    ///
    /// Commands are handled one at a time in arrival order. The loop ends on
    /// cancellation or when every sender is dropped.
    pub fn start(
        self,
        mut receiver: mpsc::Receiver<InboundMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(topic = %self.config.command_topic, "Command dispatcher started");

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    message = receiver.recv() => match message {
                        Some(message) => {
                            self.dispatch(&message).await;
                        }
                        None => {
                            info!("Command channel closed, dispatcher shutting down");
                            break;
                        }
                    }
                }
            }

            let (received, succeeded, failed, discarded) = self.stats.snapshot();
            info!(received, succeeded, failed, discarded, "Command dispatcher stopped");
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBrokerClient;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use ualink_core::{GatewayError, GatewayResult};

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<CommandKind>>,
    }

    #[async_trait]
    impl CommandHandler for RecordingHandler {
        async fn handle(&self, kind: CommandKind, _payload: &[u8]) -> GatewayResult<CommandOutcome> {
            self.calls.lock().push(kind);
            match kind {
                CommandKind::UnpublishNodes => Err(GatewayError::validation("endpointUrl", "missing")),
                CommandKind::PublishNodes => Ok(CommandOutcome::failure("1 of 2 entries failed")),
                _ => Ok(CommandOutcome::success("ok")),
            }
        }
    }

    async fn fixture() -> (CommandDispatcher, Arc<RecordingHandler>, Arc<MemoryBrokerClient>) {
        let handler = Arc::new(RecordingHandler::default());
        let client = Arc::new(MemoryBrokerClient::new());
        client.connect().await.unwrap();
        let config = DispatcherConfig {
            command_topic: "gw/commands/#".to_string(),
            response_topic: "gw/responses".to_string(),
            staleness: DEFAULT_COMMAND_STALENESS,
        };
        let dispatcher = CommandDispatcher::new(config, handler.clone(), client.clone());
        (dispatcher, handler, client)
    }

    fn request(correlation_id: &str, age_secs: i64) -> Vec<u8> {
        serde_json::json!({
            "correlationId": correlation_id,
            "timestamp": Utc::now() - chrono::Duration::seconds(age_secs),
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_success_response_topic() {
        let (dispatcher, handler, client) = fixture().await;
        let message = InboundMessage::new("gw/commands/GetInfo", request("abc", 0));

        let outcome = dispatcher.dispatch(&message).await;
        assert!(matches!(outcome, DispatchOutcome::Responded(ref r) if r.success));
        assert_eq!(*handler.calls.lock(), vec![CommandKind::GetInfo]);

        let responses = client.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].topic, "gw/responses/200/abc");
        let body = responses[0].json();
        assert_eq!(body["correlationId"], "abc");
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_stale_command_is_discarded() {
        let (dispatcher, handler, client) = fixture().await;
        let message = InboundMessage::new("gw/commands/GetInfo", request("old", 16));

        assert_eq!(dispatcher.dispatch(&message).await, DispatchOutcome::Discarded);
        assert!(handler.calls.lock().is_empty());
        assert!(client.responses().is_empty());
        assert_eq!(dispatcher.stats().snapshot().3, 1);
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_discarded() {
        let (dispatcher, _, client) = fixture().await;
        let message = InboundMessage::new("gw/commands/GetInfo", br#"{"correlationId":"x"}"#.to_vec());

        assert_eq!(dispatcher.dispatch(&message).await, DispatchOutcome::Discarded);
        assert!(client.responses().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_names_topic() {
        let (dispatcher, handler, client) = fixture().await;
        let message = InboundMessage::new("gw/commands/Reboot", request("r1", 0));

        dispatcher.dispatch(&message).await;
        assert!(handler.calls.lock().is_empty());

        let response = &client.responses()[0];
        assert_eq!(response.topic, "gw/responses/500/r1");
        let body = response.json();
        assert_eq!(body["success"], false);
        assert!(body["status"].as_str().unwrap().contains("gw/commands/Reboot"));
    }

    #[tokio::test]
    async fn test_unknown_command_field_names_command() {
        let (dispatcher, handler, client) = fixture().await;
        let payload = serde_json::json!({
            "command": "Reboot",
            "correlationId": "r2",
            "timestamp": Utc::now(),
        });
        let message = InboundMessage::new("gw/commands", payload.to_string().into_bytes());

        dispatcher.dispatch(&message).await;
        assert!(handler.calls.lock().is_empty());

        let response = &client.responses()[0];
        assert_eq!(response.topic, "gw/responses/500/r2");
        assert_eq!(response.json()["status"], "Unknown command Reboot");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failure_response() {
        let (dispatcher, _, client) = fixture().await;
        let message = InboundMessage::new("gw/commands/UnpublishNodes", request("u1", 0));

        dispatcher.dispatch(&message).await;
        let response = &client.responses()[0];
        assert_eq!(response.topic, "gw/responses/500/u1");
        assert!(response.json()["status"].as_str().unwrap().contains("endpointUrl"));
    }

    #[tokio::test]
    async fn test_partial_failure_maps_to_500() {
        let (dispatcher, _, client) = fixture().await;
        let message = InboundMessage::new("gw/commands/PublishNodes", request("p1", 0));

        dispatcher.dispatch(&message).await;
        assert_eq!(client.responses()[0].topic, "gw/responses/500/p1");
    }

    #[tokio::test]
    async fn test_command_field_fallback() {
        let (dispatcher, handler, _) = fixture().await;
        let payload = serde_json::json!({
            "command": "GetPublishedNodes",
            "correlationId": "c1",
            "timestamp": Utc::now(),
        });
        let message = InboundMessage::new("gw/commands", payload.to_string().into_bytes());

        dispatcher.dispatch(&message).await;
        assert_eq!(*handler.calls.lock(), vec![CommandKind::GetPublishedNodes]);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let (dispatcher, _, client) = fixture().await;
        let message = InboundMessage::new("gw/commands/GetInfo", b"not json".to_vec());

        dispatcher.dispatch(&message).await;
        let response = &client.responses()[0];
        assert_eq!(response.topic, "gw/responses/500/");
        assert_eq!(response.json()["success"], false);
    }

    #[tokio::test]
    async fn test_loop_drains_channel_until_cancelled() {
        let (dispatcher, handler, client) = fixture().await;
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = dispatcher.start(rx, cancel.clone());

        tx.send(InboundMessage::new("gw/commands/GetInfo", request("l1", 0)))
            .await
            .unwrap();
        tx.send(InboundMessage::new("gw/commands/UnpublishAllNodes", request("l2", 0)))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            *handler.calls.lock(),
            vec![CommandKind::GetInfo, CommandKind::UnpublishAllNodes]
        );
        assert_eq!(client.responses().len(), 2);
        assert!(!cancel.is_cancelled());
    }
}
