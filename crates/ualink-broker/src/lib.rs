// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink-broker
//!
//! Broker side of the ualink gateway.
//!
//! - [`MqttBrokerClient`]: MQTT 3.1.1 over `rumqttc`.
//! - [`KafkaBrokerClient`]: Kafka over `rdkafka` (feature `kafka`).
//! - [`MemoryBrokerClient`]: in-process client for development and tests.
//! - [`CommandDispatcher`]: command/response handling on top of any client.
//!
//! Clients push command-topic traffic into an `mpsc` channel; the dispatcher
//! drains it on its own task so that no command runs on a client's event
//! loop.
//!
//! ```text
//! broker ──► client event loop ──try_send──► mpsc ──► CommandDispatcher
//!   ▲                                                      │
//!   └──────────────── publish_response ◄───────────────────┘
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod dispatcher;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod mqtt;
pub mod options;

pub use dispatcher::{
    CommandDispatcher, DispatchOutcome, DispatcherConfig, DispatcherStats, RequestEnvelope,
    ResponseEnvelope, DEFAULT_COMMAND_STALENESS,
};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBrokerClient, KafkaSecurityConfig};
pub use memory::{CapturedResponse, MemoryBrokerClient};
pub use mqtt::MqttBrokerClient;
pub use options::BrokerOptions;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
