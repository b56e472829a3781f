// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink-config
//!
//! Configuration management for the ualink OPC UA telemetry gateway.
//!
//! ## Features
//!
//! - **Schema Definition**: every section has defaults, so an empty file is valid
//! - **Multi-Format Support**: YAML, TOML, and JSON configuration files
//! - **Placeholders**: `${VAR}` and `${VAR:default}` expanded before parsing
//! - **Environment Overrides**: `UALINK_<SECTION>_<KEY>` applied after parsing
//!
//! ## Quick Start
//!
//! ```no_run
//! use ualink_config::loader::load_config;
//!
//! let config = load_config("ualink.yaml").unwrap();
//! let settings = config.to_settings();
//! println!("Publisher: {}", settings.publisher_name);
//! ```
//!
//! ## Configuration Schema
//!
//! - `gateway` - publisher identity
//! - `broker` - MQTT/Kafka connection and topics
//! - `publisher` - direct or store-and-forward
//! - `batching` - send interval and queue capacity
//! - `source` - OPC UA session defaults
//! - `persistence` - point-set file
//! - `diagnostics` - status, metadata and self-diagnostic records
//! - `logging` - level and format

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader, EnvSource};
pub use schema::{
    BatchingConfig, BrokerConfig, BrokerKind, DiagnosticsConfig, GatewayConfig, LogFormat,
    LogLevel, LoggingConfig, PersistenceConfig, PublisherConfig, PublisherStrategy, SecretValue,
    SourceBackend, SourceConfig, UalinkConfig,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
