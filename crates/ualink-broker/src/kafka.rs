// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Kafka broker client over `rdkafka`.
//!
//! Telemetry and metadata go out through a [`FutureProducer`]. When a command
//! topic is configured, a [`StreamConsumer`] in the client-name consumer group
//! feeds the command channel. A command topic ending in `#` subscribes to
//! every topic sharing the prefix.
//!
//! Kafka topic names cannot carry the `/`-separated response path, so
//! responses are produced to the response topic with the full path as the
//! record key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ualink_core::{BrokerClient, DiagnosticCounters, GatewayError, GatewayResult, InboundMessage};

use crate::mqtt::forward_inbound;
use crate::options::BrokerOptions;

/// Producer delivery timeout.
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 10_000;

/// Time allowed for a final flush on disconnect.
pub const DEFAULT_FLUSH_TIMEOUT_SECS: u64 = 5;

/// Pause between consumer polls.
pub const DEFAULT_CONSUMER_POLL_MS: u64 = 1_000;

// =============================================================================
// Security
// =============================================================================

/// Security settings mapped onto librdkafka properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaSecurityConfig {
    /// `security.protocol`.
    pub protocol: &'static str,
    /// SASL PLAIN credentials.
    pub sasl: Option<(String, String)>,
}

impl KafkaSecurityConfig {
    /// Derives the security settings from broker options.
    pub fn from_options(options: &BrokerOptions) -> Self {
        let sasl = options
            .has_credentials()
            .then(|| (options.username.clone(), options.password.clone()));
        let protocol = match (options.use_tls, sasl.is_some()) {
            (true, true) => "SASL_SSL",
            (true, false) => "SSL",
            (false, true) => "SASL_PLAINTEXT",
            (false, false) => "PLAINTEXT",
        };
        Self { protocol, sasl }
    }

    fn apply(&self, config: &mut ClientConfig) {
        config.set("security.protocol", self.protocol);
        if let Some((username, password)) = &self.sasl {
            config
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
    }
}

/// Builds the producer configuration.
pub fn producer_config(options: &BrokerOptions) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", options.address())
        .set("client.id", &options.client_name)
        .set("message.timeout.ms", DEFAULT_MESSAGE_TIMEOUT_MS.to_string());
    KafkaSecurityConfig::from_options(options).apply(&mut config);
    config
}

/// Builds the command consumer configuration.
pub fn consumer_config(options: &BrokerOptions) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", options.address())
        .set("group.id", &options.client_name)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true");
    KafkaSecurityConfig::from_options(options).apply(&mut config);
    config
}

/// Maps a command topic filter onto a Kafka subscription.
///
/// `cmd#` becomes the pattern `^cmd.*`; anything else is used verbatim.
pub fn subscription_pattern(command_topic: &str) -> String {
    match command_topic.strip_suffix('#') {
        Some(prefix) => format!("^{}.*", prefix),
        None => command_topic.to_string(),
    }
}

// =============================================================================
// KafkaBrokerClient
// =============================================================================

struct KafkaConnection {
    producer: FutureProducer,
    cancel: CancellationToken,
}

/// Kafka broker client.
pub struct KafkaBrokerClient {
    options: BrokerOptions,
    diagnostics: Arc<DiagnosticCounters>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    connection: Mutex<Option<KafkaConnection>>,
}

impl KafkaBrokerClient {
    /// Creates an unconnected client.
    pub fn new(
        options: BrokerOptions,
        diagnostics: Arc<DiagnosticCounters>,
        inbound: Option<mpsc::Sender<InboundMessage>>,
    ) -> Self {
        Self {
            options,
            diagnostics,
            inbound,
            connection: Mutex::new(None),
        }
    }

    fn producer(&self) -> GatewayResult<FutureProducer> {
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.producer.clone())
            .ok_or_else(|| GatewayError::transport("not connected to Kafka broker"))
    }

    async fn produce(&self, topic: &str, key: Option<&str>, payload: &[u8], json: bool) -> GatewayResult<()> {
        let producer = self.producer()?;
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        if json {
            record = record.headers(OwnedHeaders::new().insert(Header {
                key: "Content-Type",
                value: Some("application/json"),
            }));
        }

        producer
            .send(record, Timeout::After(Duration::from_millis(DEFAULT_MESSAGE_TIMEOUT_MS)))
            .await
            .map(|_| ())
            .map_err(|(e, _)| GatewayError::transport(format!("produce to '{}' failed: {}", topic, e)))
    }

    fn teardown(&self) {
        if let Some(previous) = self.connection.lock().take() {
            previous.cancel.cancel();
            let _ = previous
                .producer
                .flush(Timeout::After(Duration::from_secs(DEFAULT_FLUSH_TIMEOUT_SECS)));
        }
        self.diagnostics.set_broker_connected(false);
    }

    fn start_consumer(&self, cancel: CancellationToken) -> GatewayResult<()> {
        let Some(inbound) = self.inbound.clone() else {
            return Ok(());
        };
        if !self.options.commands_enabled() {
            return Ok(());
        }

        let address = self.options.address();
        let consumer: StreamConsumer = consumer_config(&self.options)
            .create()
            .map_err(|e| GatewayError::connection(address.clone(), e.to_string()))?;
        let pattern = subscription_pattern(&self.options.command_topic);
        consumer
            .subscribe(&[pattern.as_str()])
            .map_err(|e| GatewayError::connection(address, e.to_string()))?;

        tokio::spawn(async move {
            debug!(pattern = %pattern, "Kafka command consumer started");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    received = consumer.recv() => match received {
                        Ok(message) => {
                            let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                            forward_inbound(&inbound, message.topic().to_string(), payload);
                        }
                        Err(e) => {
                            warn!(error = %e, "Kafka command consumer error");
                            tokio::time::sleep(Duration::from_millis(DEFAULT_CONSUMER_POLL_MS)).await;
                        }
                    }
                }
            }
            debug!("Kafka command consumer stopped");
        });
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn connect(&self) -> GatewayResult<()> {
        self.teardown();

        let address = self.options.address();
        let producer: FutureProducer = producer_config(&self.options).create().map_err(|e| {
            error!(broker = %address, error = %e, "Failed to create Kafka producer");
            GatewayError::connection(address.clone(), e.to_string())
        })?;

        let cancel = CancellationToken::new();
        self.start_consumer(cancel.clone())?;

        *self.connection.lock() = Some(KafkaConnection { producer, cancel });
        self.diagnostics.set_broker_connected(true);
        info!(broker = %address, "Connected to Kafka broker");
        Ok(())
    }

    async fn publish(&self, payload: &[u8]) -> GatewayResult<()> {
        self.produce(&self.options.message_topic, None, payload, true).await
    }

    async fn publish_metadata(&self, payload: &[u8]) -> GatewayResult<()> {
        self.produce(&self.options.metadata_topic, None, payload, false).await
    }

    async fn publish_response(&self, topic: &str, payload: &[u8]) -> GatewayResult<()> {
        self.produce(&self.options.response_topic, Some(topic), payload, true)
            .await
    }

    fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        self.teardown();
        Ok(())
    }

    fn name(&self) -> &str {
        "kafka"
    }
}

impl Drop for KafkaBrokerClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.cancel.cancel();
        }
    }
}
