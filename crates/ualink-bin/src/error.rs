// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the ualink binary.
//!
//! Each variant maps to a distinct process exit code so supervisors can tell
//! a bad configuration apart from a gateway that failed to come up.

use thiserror::Error;
use ualink_config::ConfigError;
use ualink_core::GatewayError;

/// Result type alias for ualink-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors surfaced by the `ualink` commands.
#[derive(Debug, Error)]
pub enum BinError {
    /// The configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Loading or validating the configuration file failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configuration selects a backend this build was compiled without.
    #[error("{what} requires the '{feature}' feature")]
    FeatureDisabled {
        /// Cargo feature that enables the backend.
        feature: &'static str,
        /// The configured backend.
        what: String,
    },

    /// A gateway component could not be brought up.
    #[error("{component} failed to start: {source}")]
    Startup {
        /// Component name.
        component: &'static str,
        /// The underlying gateway error.
        #[source]
        source: GatewayError,
    },

    /// A gateway operation failed outside startup.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Console or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rendering command output failed.
    #[error(transparent)]
    Output(#[from] anyhow::Error),

    /// Another error with a description of what was being attempted.
    #[error("{context}: {source}")]
    WithContext {
        /// What was being attempted.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an error for a backend compiled out of this build.
    pub fn feature_disabled(feature: &'static str, what: impl Into<String>) -> Self {
        Self::FeatureDisabled {
            feature,
            what: what.into(),
        }
    }

    /// Creates a startup error for `component`.
    pub fn startup(component: &'static str, source: GatewayError) -> Self {
        Self::Startup { component, source }
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Config(_) => 1,
            Self::FeatureDisabled { .. } => 2,
            Self::Startup { .. } => 3,
            Self::Gateway(_) => 4,
            Self::Io(_) | Self::Output(_) => 5,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with its cause chain on stderr.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }
}

/// Reports an error and exits with the matching code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================
