// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types for ualink-config.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading, overriding or validating the gateway
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be deserialized into the schema.
    #[error("Cannot parse '{path}': {message}")]
    Parse {
        /// Configuration file.
        path: PathBuf,
        /// Deserializer message, including unknown keys.
        message: String,
    },

    /// A setting holds a value the gateway cannot run with.
    #[error("Invalid setting '{field}': {message}")]
    Validation {
        /// Dotted key of the setting, e.g. `broker.url`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Reading the file failed.
    #[error("Cannot read '{path}': {source}")]
    Io {
        /// Configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `${VAR}` placeholder without default names an unset variable.
    #[error("Placeholder references unset environment variable {name}")]
    EnvVarNotFound {
        /// Variable name.
        name: String,
    },

    /// A `UALINK_*` override does not fit the setting it targets.
    #[error("Environment override {name} rejected: {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Why the value was rejected.
        message: String,
    },

    /// The configuration file does not exist.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// The file extension is not yaml, yml, toml or json.
    #[error("Unsupported configuration format: {format}")]
    UnsupportedFormat {
        /// Offending extension.
        format: String,
    },

    /// In-memory configuration text could not be (de)serialized.
    #[error("Malformed configuration: {message}")]
    Serialization {
        /// Deserializer message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a parse error for `path`.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error for the setting at `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an unset-placeholder error.
    pub fn env_var_not_found(name: impl Into<String>) -> Self {
        Self::EnvVarNotFound { name: name.into() }
    }

    /// Creates a rejected-override error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a missing-file error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an unsupported-extension error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if the configuration file is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::FileNotFound { .. })
    }

    /// Returns the dotted key of the offending setting, if known.
    pub fn setting(&self) -> Option<&str> {
        match self {
            ConfigError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}
