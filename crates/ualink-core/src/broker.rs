// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Broker connection contract.
//!
//! Publishers talk to the broker exclusively through [`BrokerClient`].
//! Inbound control messages are not returned by the client; they are pushed
//! as [`InboundMessage`]s onto the channel the client was built with.

use async_trait::async_trait;

use crate::error::GatewayResult;

/// A message received on the command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Full topic the message arrived on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Creates an inbound message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Wire connection to the message broker.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Connects and subscribes to the command topic.
    async fn connect(&self) -> GatewayResult<()>;

    /// Publishes a telemetry frame to the message topic.
    async fn publish(&self, payload: &[u8]) -> GatewayResult<()>;

    /// Publishes a metadata message to the metadata topic.
    async fn publish_metadata(&self, payload: &[u8]) -> GatewayResult<()>;

    /// Publishes a command response to an explicit topic.
    async fn publish_response(&self, topic: &str, payload: &[u8]) -> GatewayResult<()>;

    /// Returns `true` while the connection is up.
    fn is_connected(&self) -> bool;

    /// Closes the connection.
    async fn disconnect(&self) -> GatewayResult<()> {
        Ok(())
    }

    /// Returns a short name for logging.
    fn name(&self) -> &str;
}
