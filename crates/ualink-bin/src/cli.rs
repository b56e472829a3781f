// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Start the gateway (default)
//! - `validate`: Validate the configuration file
//! - `version`: Show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// ualink - OPC UA to MQTT/Kafka telemetry gateway
///
/// Subscribes to OPC UA servers and republishes value and event changes as
/// batched PubSub JSON frames on a message broker.
#[derive(Parser, Debug)]
#[command(
    name = "ualink",
    author = "Sylvex <contact@sylvex.io>",
    version = ualink_core::VERSION,
    about = "OPC UA to MQTT/Kafka telemetry gateway",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "ualink.yaml",
        env = "UALINK_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, env = "UALINK_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json, compact); overrides the config file
    #[arg(long, env = "UALINK_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the gateway
    ///
    /// This is the default command when no subcommand is specified.
    Run(RunArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration without starting the gateway.
    Validate(ValidateArgs),

    /// Show version information
    Version(VersionArgs),
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Development mode: in-memory broker, simulated demo server with
    /// random-walk values
    #[arg(long, env = "UALINK_DEV_MODE")]
    pub dev: bool,

    /// Do not connect to the broker or replay the persisted point set
    #[arg(long)]
    pub skip_connect: bool,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Print the parsed configuration after validation
    #[arg(short, long)]
    pub show: bool,
}

/// Arguments for the `version` command.
#[derive(Args, Debug, Default, Clone)]
pub struct VersionArgs {
    /// Print version information as JSON
    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<ualink_config::LogFormat> for LogFormat {
    fn from(format: ualink_config::LogFormat) -> Self {
        match format {
            ualink_config::LogFormat::Text => LogFormat::Text,
            ualink_config::LogFormat::Json => LogFormat::Json,
            ualink_config::LogFormat::Compact => LogFormat::Compact,
        }
    }
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Check if verbose logging is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose && !self.quiet
    }

    /// Resolves the log level: flags, then `--log-level`, then the config file.
    pub fn effective_log_level(&self, configured: ualink_config::LogLevel) -> String {
        if self.quiet {
            "warn".to_string()
        } else if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| configured.as_str().to_string())
        }
    }

    /// Resolves the log format: `--log-format`, then the config file.
    pub fn effective_log_format(&self, configured: ualink_config::LogFormat) -> LogFormat {
        self.log_format.unwrap_or_else(|| configured.into())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ualink_config::LogLevel;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["ualink"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(_)));
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from(["ualink", "run", "--dev", "--skip-connect"]);
        if let Some(Commands::Run(args)) = cli.command {
            assert!(args.dev);
            assert!(args.skip_connect);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["ualink", "validate", "--show"]);
        if let Some(Commands::Validate(args)) = cli.command {
            assert!(args.show);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_version_json() {
        let cli = Cli::parse_from(["ualink", "version", "--json"]);
        assert!(matches!(cli.command, Some(Commands::Version(VersionArgs { json: true }))));
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["ualink", "-c", "/etc/ualink/gateway.yaml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/ualink/gateway.yaml"));
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli::parse_from(["ualink", "-l", "trace"]);
        assert_eq!(cli.effective_log_level(LogLevel::Error), "trace");

        let cli = Cli::parse_from(["ualink", "-q", "-l", "trace"]);
        assert_eq!(cli.effective_log_level(LogLevel::Error), "warn");

        let cli = Cli::parse_from(["ualink", "-v"]);
        assert!(cli.is_verbose());
        assert_eq!(cli.effective_log_level(LogLevel::Error), "debug");
    }

    #[test]
    fn test_log_format_falls_back_to_config() {
        let cli = Cli::parse_from(["ualink", "--log-format", "compact"]);
        assert_eq!(cli.effective_log_format(ualink_config::LogFormat::Json), LogFormat::Compact);
    }
}
