// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for ualink.
//!
//! Every fallible operation in the gateway returns a [`GatewayError`]. The
//! variants follow the failure domains of the pipeline:
//!
//! ```text
//! GatewayError
//! ├── Connection     - source endpoint unreachable or unauthenticated
//! ├── Resolution     - node id unresolvable on a connected endpoint
//! ├── Validation     - malformed command or missing credentials
//! ├── Capacity       - record or frame exceeds a size limit
//! ├── Transport      - broker publish failed
//! ├── Persistence    - point-set file or spill directory I/O
//! ├── Serialization  - JSON encode/decode failure
//! └── Shutdown       - operation refused because the gateway is stopping
//! ```
//!
//! # Examples
//!
//! ```
//! use ualink_core::error::GatewayError;
//!
//! let error = GatewayError::connection("opc.tcp://plc:4840", "connection refused");
//! assert!(error.is_retryable());
//! assert_eq!(error.error_type(), "connection");
//! ```

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// GatewayError
// =============================================================================

/// The root error type for ualink.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The source endpoint could not be reached or rejected the session.
    #[error("Connection to '{endpoint}' failed: {message}")]
    Connection {
        /// Endpoint URL.
        endpoint: String,
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A node id could not be resolved on a connected endpoint.
    #[error("Cannot resolve node '{node_id}' on '{endpoint}': {message}")]
    Resolution {
        /// Endpoint URL.
        endpoint: String,
        /// The node id as requested.
        node_id: String,
        /// Error message.
        message: String,
    },

    /// A command payload or request failed validation.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// Offending field.
        field: String,
        /// Error message.
        message: String,
    },

    /// A record or frame is larger than the allowed budget.
    #[error("Size {size} bytes exceeds limit of {limit} bytes")]
    Capacity {
        /// Actual size in bytes.
        size: usize,
        /// Allowed size in bytes.
        limit: usize,
    },

    /// The broker rejected or failed a publish.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// Local file I/O failed.
    #[error("Persistence error at '{path}': {source}")]
    Persistence {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// The gateway is shutting down.
    #[error("Gateway is shutting down")]
    Shutdown,
}

impl GatewayError {
    /// Creates a connection error.
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection error with a source.
    pub fn connection_with<E>(endpoint: impl Into<String>, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a resolution error.
    pub fn resolution(
        endpoint: impl Into<String>,
        node_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            endpoint: endpoint.into(),
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a capacity error.
    pub fn capacity(size: usize, limit: usize) -> Self {
        Self::Capacity { size, limit }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a persistence error.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    ///
    /// Connection and transport failures are transient; everything else
    /// fails the same way on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Transport { .. })
    }

    /// Returns the error type as a string for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Resolution { .. } => "resolution",
            Self::Validation { .. } => "validation",
            Self::Capacity { .. } => "capacity",
            Self::Transport { .. } => "transport",
            Self::Persistence { .. } => "persistence",
            Self::Serialization { .. } => "serialization",
            Self::Shutdown => "shutdown",
        }
    }

    /// Returns a message suitable for a command response.
    ///
    /// Internal details such as I/O paths are left out.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection { endpoint, message, .. } => {
                format!("Could not connect to {}: {}", endpoint, message)
            }
            Self::Resolution { node_id, message, .. } => {
                format!("Node {} could not be resolved: {}", node_id, message)
            }
            Self::Validation { field, message } => format!("Invalid {}: {}", field, message),
            Self::Capacity { size, limit } => {
                format!("Message of {} bytes exceeds the {} byte limit", size, limit)
            }
            Self::Transport { message } => format!("Broker error: {}", message),
            Self::Persistence { .. } => "Local storage error".to_string(),
            Self::Serialization { message } => format!("Malformed payload: {}", message),
            Self::Shutdown => "Gateway is shutting down".to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;

// =============================================================================
// Tests
// =============================================================================
