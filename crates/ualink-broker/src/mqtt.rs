// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT broker client over `rumqttc`.
//!
//! `rumqttc` splits a connection into an [`AsyncClient`] handle and an
//! [`EventLoop`] that must be polled for anything to move. The client spawns
//! one poll task per connection. That task:
//!
//! - flips the connected flag on `ConnAck` and on connection errors,
//! - re-subscribes to the command topic after every `ConnAck` (clean
//!   sessions drop subscriptions),
//! - forwards inbound publishes as [`InboundMessage`]s with a non-blocking
//!   send,
//! - waits `reconnect_delay` after a dropped connection, then lets the next
//!   poll reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ualink_core::{BrokerClient, DiagnosticCounters, GatewayError, GatewayResult, InboundMessage};

use crate::options::BrokerOptions;

/// Capacity of the request channel between the client handle and the event loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// MqttBrokerClient
// =============================================================================

struct MqttConnection {
    client: AsyncClient,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

/// MQTT 3.1.1 broker client.
pub struct MqttBrokerClient {
    options: BrokerOptions,
    diagnostics: Arc<DiagnosticCounters>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    connection: Mutex<Option<MqttConnection>>,
    connected: Arc<watch::Sender<bool>>,
}

impl MqttBrokerClient {
    /// Creates an unconnected client.
    ///
    /// Messages arriving on the command topic are pushed into `inbound`.
    pub fn new(
        options: BrokerOptions,
        diagnostics: Arc<DiagnosticCounters>,
        inbound: Option<mpsc::Sender<InboundMessage>>,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            options,
            diagnostics,
            inbound,
            connection: Mutex::new(None),
            connected: Arc::new(connected),
        }
    }

    /// Returns the options.
    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    /// Builds the `rumqttc` options.
    pub fn mqtt_options(&self) -> MqttOptions {
        let options = &self.options;
        let mut mqtt = MqttOptions::new(&options.client_name, &options.url, options.port);
        mqtt.set_keep_alive(options.keep_alive.max(Duration::from_secs(1)));
        mqtt.set_clean_session(true);
        if options.has_credentials() {
            mqtt.set_credentials(&options.username, &options.password);
        }
        if options.use_tls {
            mqtt.set_transport(Transport::tls_with_default_config());
        }
        mqtt
    }

    /// Stops the current poll task, if any.
    fn teardown(&self) -> Option<AsyncClient> {
        let previous = self.connection.lock().take()?;
        previous.cancel.cancel();
        self.mark(false);
        Some(previous.client)
    }

    fn mark(&self, connected: bool) {
        self.connected.send_replace(connected);
        self.diagnostics.set_broker_connected(connected);
    }

    async fn publish_to(&self, topic: &str, payload: &[u8]) -> GatewayResult<()> {
        if !self.is_connected() {
            return Err(GatewayError::transport("not connected to MQTT broker"));
        }
        let client = self
            .connection
            .lock()
            .as_ref()
            .map(|c| c.client.clone())
            .ok_or_else(|| GatewayError::transport("not connected to MQTT broker"))?;

        client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| GatewayError::transport(format!("publish to '{}' failed: {}", topic, e)))
    }
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn connect(&self) -> GatewayResult<()> {
        if let Some(previous) = self.teardown() {
            let _ = previous.try_disconnect();
        }

        let (client, eventloop) = AsyncClient::new(self.mqtt_options(), EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let mut connected_rx = self.connected.subscribe();

        let poller = EventLoopTask {
            client: client.clone(),
            command_topic: self
                .options
                .commands_enabled()
                .then(|| self.options.command_topic.clone()),
            reconnect_delay: self.options.reconnect_delay,
            inbound: self.inbound.clone(),
            connected: self.connected.clone(),
            diagnostics: self.diagnostics.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(poller.run(eventloop));

        *self.connection.lock() = Some(MqttConnection {
            client,
            cancel,
            _task: task,
        });

        let address = self.options.address();
        let acked = matches!(
            tokio::time::timeout(self.options.connect_timeout, connected_rx.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        match acked {
            true => Ok(()),
            // The poll task keeps retrying in the background.
            _ => Err(GatewayError::connection(
                address,
                "no connection acknowledgement from MQTT broker",
            )),
        }
    }

    async fn publish(&self, payload: &[u8]) -> GatewayResult<()> {
        self.publish_to(&self.options.message_topic, payload).await
    }

    async fn publish_metadata(&self, payload: &[u8]) -> GatewayResult<()> {
        self.publish_to(&self.options.metadata_topic, payload).await
    }

    async fn publish_response(&self, topic: &str, payload: &[u8]) -> GatewayResult<()> {
        self.publish_to(topic, payload).await
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        if let Some(client) = self.teardown() {
            if let Err(e) = client.try_disconnect() {
                debug!(error = %e, "MQTT disconnect request not delivered");
            }
            info!(broker = %self.options.address(), "Disconnected from MQTT broker");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mqtt"
    }
}

impl Drop for MqttBrokerClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.cancel.cancel();
        }
    }
}

// =============================================================================
// Event Loop
// =============================================================================

struct EventLoopTask {
    client: AsyncClient,
    command_topic: Option<String>,
    reconnect_delay: Duration,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    connected: Arc<watch::Sender<bool>>,
    diagnostics: Arc<DiagnosticCounters>,
    cancel: CancellationToken,
}

impl EventLoopTask {
    async fn run(self, mut eventloop: EventLoop) {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        self.set_connected(true);
                        info!("Connected to MQTT broker");
                        self.subscribe_commands();
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some(inbound) = &self.inbound {
                            forward_inbound(inbound, publish.topic, publish.payload.to_vec());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.set_connected(false);
                        warn!(
                            error = %e,
                            delay_ms = self.reconnect_delay.as_millis() as u64,
                            "Disconnected from MQTT broker, reconnecting"
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                    }
                }
            }
        }

        debug!("MQTT event loop stopped");
    }

    fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
        self.diagnostics.set_broker_connected(connected);
    }

    fn subscribe_commands(&self) {
        let Some(topic) = &self.command_topic else {
            return;
        };
        // try_subscribe: awaiting here would stall the loop that drains the request channel.
        match self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            Ok(()) => debug!(topic = %topic, "Subscribed to command topic"),
            Err(e) => error!(topic = %topic, error = %e, "Failed to subscribe to command topic"),
        }
    }
}

/// Hands an inbound message to the dispatcher without waiting.
///
/// Returns `false` if the message was dropped.
pub(crate) fn forward_inbound(
    inbound: &mpsc::Sender<InboundMessage>,
    topic: String,
    payload: Vec<u8>,
) -> bool {
    match inbound.try_send(InboundMessage::new(topic, payload)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(message)) => {
            warn!(topic = %message.topic, "Command channel full, dropping message");
            false
        }
        Err(mpsc::error::TrySendError::Closed(message)) => {
            debug!(topic = %message.topic, "Command channel closed, dropping message");
            false
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn client(options: BrokerOptions) -> MqttBrokerClient {
        MqttBrokerClient::new(options, Arc::new(DiagnosticCounters::new()), None)
    }

    #[test]
    fn test_mqtt_options() {
        let mut options = BrokerOptions::new("broker.local", 1883);
        options.client_name = "gw-1".to_string();
        options.username = "user".to_string();
        options.password = "secret".to_string();
        options.use_tls = false;

        let mqtt = client(options).mqtt_options();
        assert_eq!(mqtt.client_id(), "gw-1");
        assert_eq!(mqtt.broker_address(), ("broker.local".to_string(), 1883));
        assert_eq!(mqtt.keep_alive(), Duration::from_secs(100));
        assert!(mqtt.clean_session());
        assert_eq!(
            mqtt.credentials(),
            Some(("user".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_anonymous_has_no_credentials() {
        let mut options = BrokerOptions::new("broker.local", 1883);
        options.use_tls = false;
        assert_eq!(client(options).mqtt_options().credentials(), None);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_fails() {
        let client = client(BrokerOptions::default());
        assert!(!client.is_connected());

        let err = client.publish(b"{}").await.unwrap_err();
        assert_eq!(err.error_type(), "transport");
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_inbound_never_blocks() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(forward_inbound(&tx, "cmd/GetInfo".into(), b"{}".to_vec()));
        assert!(!forward_inbound(&tx, "cmd/GetInfo".into(), b"{}".to_vec()));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "cmd/GetInfo");

        drop(rx);
        assert!(!forward_inbound(&tx, "cmd/GetInfo".into(), Vec::new()));
    }
}
