// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions for ualink.
//!
//! Every section has serde defaults, so an empty file is a valid
//! configuration. [`UalinkConfig::validate`] checks cross-field rules and
//! [`UalinkConfig::to_settings`] projects the runtime values into
//! [`GatewaySettings`].
//!
//! # Example
//!
//! ```yaml
//! gateway:
//!   publisher_name: line-1-gateway
//! broker:
//!   kind: mqtt
//!   url: broker.example.com
//!   port: 8883
//!   message_topic: plant/line1/data
//!   command_topic: plant/line1/commands/#
//!   response_topic: plant/line1/responses
//! publisher:
//!   strategy: store_forward
//!   spill_dir: ./store
//! source:
//!   backend: opcua
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ualink_core::context::{
    DEFAULT_APPLICATION_URI, DEFAULT_BROKER_MESSAGE_SIZE, DEFAULT_PUBLISHER_NAME,
    DEFAULT_PUBLISHING_INTERVAL_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_SAMPLING_INTERVAL_MS,
    MAX_RESPONSE_PAYLOAD, MESSAGE_PROPERTY_OVERHEAD,
};
use ualink_core::GatewaySettings;

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default broker port.
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Default MQTT keep-alive in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 100;

/// Default broker reconnect delay in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// Default command staleness window in seconds.
pub const DEFAULT_COMMAND_STALENESS_SECS: u64 = 15;

/// Default source keep-alive probe interval.
pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 5_000;

/// Default consecutive missed keep-alives before a reconnect.
pub const DEFAULT_MAX_MISSED_KEEP_ALIVES: u32 = 3;

/// Default delay between source reconnect attempts.
pub const DEFAULT_RECONNECT_PERIOD_MS: u64 = 10_000;

/// Default source session timeout.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 60_000;

/// Default diagnostics period in seconds.
pub const DEFAULT_DIAGNOSTICS_INTERVAL_SECS: u64 = 30;

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration structure for ualink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UalinkConfig {
    /// Gateway identity.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Broker connection.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Publish strategy.
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Frame batching.
    #[serde(default)]
    pub batching: BatchingConfig,

    /// OPC UA sources.
    #[serde(default)]
    pub source: SourceConfig,

    /// Point-set persistence.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Diagnostics reporting.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UalinkConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.gateway.validate()?;
        self.broker.validate()?;
        self.publisher.validate()?;
        self.batching.validate()?;
        self.source.validate()?;
        self.persistence.validate()?;
        self.diagnostics.validate()?;
        Ok(())
    }

    /// Projects the runtime-relevant values into [`GatewaySettings`].
    pub fn to_settings(&self) -> GatewaySettings {
        GatewaySettings {
            publisher_name: self.gateway.publisher_name.clone(),
            application_uri: self.gateway.application_uri.clone(),
            send_interval: Duration::from_secs(self.batching.send_interval_secs),
            broker_message_size: self.broker.message_size,
            queue_capacity: self.batching.queue_capacity,
            default_publishing_interval_ms: self.source.default_publishing_interval_ms,
            default_sampling_interval_ms: self.source.default_sampling_interval_ms,
            suppressed_status_codes: self.source.suppressed_status_codes.clone(),
            max_response_payload: MAX_RESPONSE_PAYLOAD,
            send_metadata: self.diagnostics.send_metadata,
            metadata_interval: Duration::from_secs(self.diagnostics.metadata_interval_secs),
            send_status: self.diagnostics.send_status,
            diagnostics_interval: Duration::from_secs(self.diagnostics.interval_secs),
        }
    }
}

// =============================================================================
// Gateway Configuration
// =============================================================================

/// Gateway identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Name published in every frame header.
    #[serde(default = "default_publisher_name")]
    pub publisher_name: String,

    /// Application URI of the gateway.
    #[serde(default = "default_application_uri")]
    pub application_uri: String,
}

fn default_publisher_name() -> String {
    DEFAULT_PUBLISHER_NAME.to_string()
}

fn default_application_uri() -> String {
    DEFAULT_APPLICATION_URI.to_string()
}

impl GatewayConfig {
    /// Validates the gateway configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.publisher_name.trim().is_empty() {
            return Err(ConfigError::validation("gateway.publisher_name", "cannot be empty"));
        }
        if self.application_uri.trim().is_empty() {
            return Err(ConfigError::validation("gateway.application_uri", "cannot be empty"));
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            publisher_name: default_publisher_name(),
            application_uri: default_application_uri(),
        }
    }
}

// =============================================================================
// Broker Configuration
// =============================================================================

/// Broker client implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// MQTT 3.1.1.
    #[default]
    Mqtt,
    /// Apache Kafka.
    Kafka,
    /// In-process broker for development.
    Memory,
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerKind::Mqtt => write!(f, "mqtt"),
            BrokerKind::Kafka => write!(f, "kafka"),
            BrokerKind::Memory => write!(f, "memory"),
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Client implementation.
    #[serde(default)]
    pub kind: BrokerKind,

    /// Broker host name.
    #[serde(default)]
    pub url: String,

    /// Broker port.
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Client id.
    #[serde(default = "default_publisher_name")]
    pub client_name: String,

    /// User name.
    #[serde(default)]
    pub username: String,

    /// Password.
    #[serde(default)]
    pub password: SecretValue,

    /// Wrap the connection in TLS.
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Telemetry topic.
    #[serde(default)]
    pub message_topic: String,

    /// Metadata topic.
    #[serde(default)]
    pub metadata_topic: String,

    /// Command topic filter. Empty disables remote commands.
    #[serde(default)]
    pub command_topic: String,

    /// Response topic prefix.
    #[serde(default)]
    pub response_topic: String,

    /// Maximum broker message size in bytes. Zero disables size batching.
    #[serde(default = "default_message_size")]
    pub message_size: usize,

    /// MQTT keep-alive in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Delay before reconnecting after a dropped connection.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Commands older than this are discarded.
    #[serde(default = "default_command_staleness_secs")]
    pub command_staleness_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn default_message_size() -> usize {
    DEFAULT_BROKER_MESSAGE_SIZE
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY_SECS
}

fn default_command_staleness_secs() -> u64 {
    DEFAULT_COMMAND_STALENESS_SECS
}

impl BrokerConfig {
    /// Validates the broker configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.kind != BrokerKind::Memory {
            if self.url.trim().is_empty() {
                return Err(ConfigError::validation("broker.url", "cannot be empty"));
            }
            if self.port == 0 {
                return Err(ConfigError::validation("broker.port", "cannot be zero"));
            }
            if self.message_topic.trim().is_empty() {
                return Err(ConfigError::validation("broker.message_topic", "cannot be empty"));
            }
        }
        if self.message_size != 0 && self.message_size <= MESSAGE_PROPERTY_OVERHEAD {
            return Err(ConfigError::validation(
                "broker.message_size",
                format!("must be 0 or larger than {} bytes", MESSAGE_PROPERTY_OVERHEAD),
            ));
        }
        if self.command_staleness_secs == 0 {
            return Err(ConfigError::validation(
                "broker.command_staleness_secs",
                "cannot be zero",
            ));
        }
        if !self.command_topic.is_empty() && self.response_topic.trim().is_empty() {
            return Err(ConfigError::validation(
                "broker.response_topic",
                "required when a command topic is set",
            ));
        }
        Ok(())
    }

    /// Returns the keep-alive period.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Returns the reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Returns the command staleness window.
    pub fn command_staleness(&self) -> Duration {
        Duration::from_secs(self.command_staleness_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            url: String::new(),
            port: DEFAULT_BROKER_PORT,
            client_name: default_publisher_name(),
            username: String::new(),
            password: SecretValue::default(),
            use_tls: true,
            message_topic: String::new(),
            metadata_topic: String::new(),
            command_topic: String::new(),
            response_topic: String::new(),
            message_size: DEFAULT_BROKER_MESSAGE_SIZE,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            command_staleness_secs: DEFAULT_COMMAND_STALENESS_SECS,
        }
    }
}

// =============================================================================
// Publisher Configuration
// =============================================================================

/// How failed sends are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherStrategy {
    /// Count the failure and move on.
    #[default]
    Direct,
    /// Spill to disk and replay later.
    StoreForward,
}

/// Publish strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    /// Strategy.
    #[serde(default)]
    pub strategy: PublisherStrategy,

    /// Spill directory for store-and-forward.
    #[serde(default = "default_spill_dir")]
    pub spill_dir: PathBuf,

    /// Spilled frames replayed per successful send.
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,
}

fn default_spill_dir() -> PathBuf {
    PathBuf::from("store")
}

fn default_drain_batch() -> usize {
    1
}

impl PublisherConfig {
    /// Validates the publisher configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.drain_batch == 0 {
            return Err(ConfigError::validation("publisher.drain_batch", "cannot be zero"));
        }
        if self.strategy == PublisherStrategy::StoreForward && self.spill_dir.as_os_str().is_empty() {
            return Err(ConfigError::validation("publisher.spill_dir", "cannot be empty"));
        }
        Ok(())
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            strategy: PublisherStrategy::default(),
            spill_dir: default_spill_dir(),
            drain_batch: default_drain_batch(),
        }
    }
}

// =============================================================================
// Batching Configuration
// =============================================================================

/// Frame batching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchingConfig {
    /// Send interval in seconds. Zero disables the timer.
    #[serde(default = "default_send_interval_secs")]
    pub send_interval_secs: u64,

    /// Record queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_send_interval_secs() -> u64 {
    1
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl BatchingConfig {
    /// Validates the batching configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::validation("batching.queue_capacity", "cannot be zero"));
        }
        Ok(())
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            send_interval_secs: default_send_interval_secs(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// Source Configuration
// =============================================================================

/// Source session backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceBackend {
    /// In-memory simulated servers.
    #[default]
    Simulated,
    /// OPC UA client stack.
    Opcua,
}

/// OPC UA source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Backend.
    #[serde(default)]
    pub backend: SourceBackend,

    /// Publishing interval used when a request gives 0.
    #[serde(default = "default_publishing_interval_ms")]
    pub default_publishing_interval_ms: u32,

    /// Sampling interval used when a request gives 0.
    #[serde(default = "default_sampling_interval_ms")]
    pub default_sampling_interval_ms: u32,

    /// Keep-alive probe interval.
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,

    /// Consecutive missed probes that trigger a reconnect.
    #[serde(default = "default_max_missed_keep_alives")]
    pub max_missed_keep_alives: u32,

    /// Delay between reconnect attempts.
    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,

    /// Status codes whose notifications are dropped.
    #[serde(default)]
    pub suppressed_status_codes: Vec<u32>,

    /// Session timeout requested from servers.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Certificate store directory.
    #[serde(default = "default_pki_dir")]
    pub pki_dir: PathBuf,

    /// Accept server certificates without a trust list entry.
    #[serde(default)]
    pub trust_server_certs: bool,
}

fn default_publishing_interval_ms() -> u32 {
    DEFAULT_PUBLISHING_INTERVAL_MS
}

fn default_sampling_interval_ms() -> u32 {
    DEFAULT_SAMPLING_INTERVAL_MS
}

fn default_keep_alive_interval_ms() -> u64 {
    DEFAULT_KEEP_ALIVE_INTERVAL_MS
}

fn default_max_missed_keep_alives() -> u32 {
    DEFAULT_MAX_MISSED_KEEP_ALIVES
}

fn default_reconnect_period_ms() -> u64 {
    DEFAULT_RECONNECT_PERIOD_MS
}

fn default_session_timeout_ms() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MS
}

fn default_pki_dir() -> PathBuf {
    PathBuf::from("pki")
}

impl SourceConfig {
    /// Validates the source configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.keep_alive_interval_ms == 0 {
            return Err(ConfigError::validation(
                "source.keep_alive_interval_ms",
                "cannot be zero",
            ));
        }
        if self.max_missed_keep_alives == 0 {
            return Err(ConfigError::validation(
                "source.max_missed_keep_alives",
                "cannot be zero",
            ));
        }
        if self.reconnect_period_ms == 0 {
            return Err(ConfigError::validation("source.reconnect_period_ms", "cannot be zero"));
        }
        Ok(())
    }

    /// Returns the keep-alive probe interval.
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Returns the reconnect period.
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            backend: SourceBackend::default(),
            default_publishing_interval_ms: DEFAULT_PUBLISHING_INTERVAL_MS,
            default_sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            keep_alive_interval_ms: DEFAULT_KEEP_ALIVE_INTERVAL_MS,
            max_missed_keep_alives: DEFAULT_MAX_MISSED_KEEP_ALIVES,
            reconnect_period_ms: DEFAULT_RECONNECT_PERIOD_MS,
            suppressed_status_codes: Vec::new(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            pki_dir: default_pki_dir(),
            trust_server_certs: false,
        }
    }
}

// =============================================================================
// Persistence Configuration
// =============================================================================

/// Point-set persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Point-set file.
    #[serde(default = "default_points_file")]
    pub points_file: PathBuf,

    /// Replay the point-set file at startup.
    #[serde(default)]
    pub auto_load: bool,
}

fn default_points_file() -> PathBuf {
    PathBuf::from("settings/persistency.json")
}

impl PersistenceConfig {
    /// Validates the persistence configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.points_file.as_os_str().is_empty() {
            return Err(ConfigError::validation("persistence.points_file", "cannot be empty"));
        }
        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            points_file: default_points_file(),
            auto_load: false,
        }
    }
}

// =============================================================================
// Diagnostics Configuration
// =============================================================================

/// Diagnostics reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Reporting period in seconds.
    #[serde(default = "default_diagnostics_interval_secs")]
    pub interval_secs: u64,

    /// Emit a status message on every report.
    #[serde(default)]
    pub send_status: bool,

    /// Emit dataset metadata per writer.
    #[serde(default)]
    pub send_metadata: bool,

    /// Metadata resend period in seconds.
    #[serde(default = "default_diagnostics_interval_secs")]
    pub metadata_interval_secs: u64,

    /// Publish the gateway's own counters as records.
    #[serde(default = "default_true")]
    pub self_records: bool,
}

fn default_diagnostics_interval_secs() -> u64 {
    DEFAULT_DIAGNOSTICS_INTERVAL_SECS
}

impl DiagnosticsConfig {
    /// Validates the diagnostics configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_secs == 0 {
            return Err(ConfigError::validation("diagnostics.interval_secs", "cannot be zero"));
        }
        if self.send_metadata && self.metadata_interval_secs == 0 {
            return Err(ConfigError::validation(
                "diagnostics.metadata_interval_secs",
                "cannot be zero when metadata is sent",
            ));
        }
        Ok(())
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_DIAGNOSTICS_INTERVAL_SECS,
            send_status: false,
            send_metadata: false,
            metadata_interval_secs: DEFAULT_DIAGNOSTICS_INTERVAL_SECS,
            self_records: true,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Single-line compact text.
    Compact,
    /// JSON lines.
    Json,
}

// =============================================================================
// Secret Value
// =============================================================================

/// A secret that never appears in `Debug` or `Display` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    /// Creates a new secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the plain value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if no secret is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "")
        } else {
            write!(f, "***")
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mqtt_config() -> UalinkConfig {
        let mut config = UalinkConfig::default();
        config.broker.url = "broker.local".to_string();
        config.broker.message_topic = "data".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = UalinkConfig::default();
        assert_eq!(config.gateway.publisher_name, "UACloudPublisher");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.message_size, 256 * 1024);
        assert_eq!(config.publisher.drain_batch, 1);
        assert_eq!(config.source.max_missed_keep_alives, 3);
        assert_eq!(config.persistence.points_file, PathBuf::from("settings/persistency.json"));
        assert!(config.diagnostics.self_records);
    }

    #[test]
    fn test_default_mqtt_needs_url() {
        let err = UalinkConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "broker.url"));
        assert!(mqtt_config().validate().is_ok());
    }

    #[test]
    fn test_memory_broker_needs_no_url() {
        let mut config = UalinkConfig::default();
        config.broker.kind = BrokerKind::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_message_size_bounds() {
        let mut config = mqtt_config();
        config.broker.message_size = 100;
        assert!(config.validate().is_err());
        config.broker.message_size = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_command_topic_requires_response_topic() {
        let mut config = mqtt_config();
        config.broker.command_topic = "cmd/#".to_string();
        assert!(config.validate().is_err());
        config.broker.response_topic = "rsp".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_settings() {
        let mut config = mqtt_config();
        config.batching.send_interval_secs = 0;
        config.broker.message_size = 0;
        config.source.suppressed_status_codes = vec![0x8034_0000];

        let settings = config.to_settings();
        assert!(settings.immediate_mode());
        assert_eq!(settings.suppressed_status_codes, vec![0x8034_0000]);
        assert_eq!(settings.max_response_payload, MAX_RESPONSE_PAYLOAD);
        assert_eq!(settings.diagnostics_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_secret_is_masked() {
        let secret = SecretValue::new("hunter2");
        assert_eq!(secret.to_string(), "***");
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }
}
