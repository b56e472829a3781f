// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Broker connection options shared by every client.

use std::fmt;
use std::time::Duration;

/// Default broker port.
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Default MQTT keep-alive period.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(100);

/// Default wait before reconnecting after a dropped connection.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default time allowed for the initial connection handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the inbound command channel.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Connection and topic settings for a broker client.
#[derive(Clone)]
pub struct BrokerOptions {
    /// Broker host name.
    pub url: String,
    /// Broker port.
    pub port: u16,
    /// Client id, also used as the Kafka consumer group.
    pub client_name: String,
    /// User name, empty for anonymous access.
    pub username: String,
    /// Password or access token.
    pub password: String,
    /// Wrap the connection in TLS.
    pub use_tls: bool,
    /// Topic telemetry frames are published to.
    pub message_topic: String,
    /// Topic metadata messages are published to.
    pub metadata_topic: String,
    /// Command topic filter, optionally ending in `#`. Empty disables commands.
    pub command_topic: String,
    /// Prefix of the response topics.
    pub response_topic: String,
    /// Keep-alive period.
    pub keep_alive: Duration,
    /// Wait before reconnecting after a dropped connection.
    pub reconnect_delay: Duration,
    /// Time allowed for the initial handshake.
    pub connect_timeout: Duration,
}

impl BrokerOptions {
    /// Creates options for `url:port` with default topics and timings.
    pub fn new(url: impl Into<String>, port: u16) -> Self {
        Self {
            url: url.into(),
            port,
            ..Self::default()
        }
    }

    /// Returns `true` if credentials were supplied.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// Returns `true` if inbound commands are enabled.
    pub fn commands_enabled(&self) -> bool {
        !self.command_topic.trim().is_empty()
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.url, self.port)
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            url: "localhost".to_string(),
            port: DEFAULT_BROKER_PORT,
            client_name: "UACloudPublisher".to_string(),
            username: String::new(),
            password: String::new(),
            use_tls: true,
            message_topic: "data".to_string(),
            metadata_topic: "metadata".to_string(),
            command_topic: String::new(),
            response_topic: "response".to_string(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl fmt::Debug for BrokerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerOptions")
            .field("url", &self.url)
            .field("port", &self.port)
            .field("client_name", &self.client_name)
            .field("username", &self.username)
            .field("password", &"***")
            .field("use_tls", &self.use_tls)
            .field("message_topic", &self.message_topic)
            .field("command_topic", &self.command_topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_password() {
        let mut options = BrokerOptions::new("broker.local", 1883);
        options.password = "hunter2".to_string();
        let rendered = format!("{:?}", options);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(options.address(), "broker.local:1883");
        assert!(!options.commands_enabled());
    }
}
