// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use anyhow::Context;
use ualink_config::{BrokerKind, PublisherStrategy, SecretValue, SourceBackend, UalinkConfig};

use crate::cli::{Cli, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    if !config_path.exists() {
        return Err(BinError::Configuration(format!(
            "Configuration file not found: {}",
            config_path.display()
        )));
    }

    let config = ualink_config::load_config(config_path).map_err(|e| {
        BinError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    let warnings = collect_warnings(&config);

    println!("✓ Configuration is valid: {}", config_path.display());
    println!();
    println!("Summary:");
    println!("  Publisher:   {}", config.gateway.publisher_name);
    println!("  Broker:      {} {}:{}", config.broker.kind, config.broker.url, config.broker.port);
    println!("  Topic:       {}", config.broker.message_topic);
    println!(
        "  Commands:    {}",
        if config.broker.command_topic.is_empty() { "disabled" } else { config.broker.command_topic.as_str() }
    );
    println!(
        "  Publisher:   {}",
        match config.publisher.strategy {
            PublisherStrategy::Direct => "direct",
            PublisherStrategy::StoreForward => "store-and-forward",
        }
    );
    println!(
        "  Source:      {}",
        match config.source.backend {
            SourceBackend::Simulated => "simulated",
            SourceBackend::Opcua => "opcua",
        }
    );
    println!("  Points file: {}", config.persistence.points_file.display());

    if !warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &warnings {
            println!("  ⚠ {}", warning);
        }
    }

    if args.show {
        println!();
        println!("Parsed configuration:");
        println!("{}", render_masked(&config)?);
    }

    Ok(())
}

/// Lists settings that are valid but probably unintended.
fn collect_warnings(config: &UalinkConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.broker.kind == BrokerKind::Memory {
        warnings.push("In-memory broker configured, nothing leaves the process".to_string());
    }
    if config.broker.kind != BrokerKind::Memory && !config.broker.use_tls {
        warnings.push("Broker TLS is disabled".to_string());
    }
    if !config.broker.username.is_empty() && config.broker.password.is_empty() {
        warnings.push("Broker username set without a password".to_string());
    }
    if config.source.trust_server_certs {
        warnings.push("All OPC UA server certificates are trusted".to_string());
    }
    if config.broker.metadata_topic.is_empty() && config.diagnostics.send_metadata {
        warnings.push("Metadata messages go to the telemetry topic".to_string());
    }

    warnings
}

/// Renders the configuration as JSON with the broker password masked.
fn render_masked(config: &UalinkConfig) -> BinResult<String> {
    let mut masked = config.clone();
    if !masked.broker.password.is_empty() {
        masked.broker.password = SecretValue::new("***");
    }
    let rendered = serde_json::to_string_pretty(&masked).context("rendering configuration")?;
    Ok(rendered)
}
