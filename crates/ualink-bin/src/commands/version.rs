// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use anyhow::Context;

use crate::cli::{Cli, VersionArgs};
use crate::error::BinResult;

fn feature_state(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli, args: VersionArgs) -> BinResult<()> {
    if args.json {
        let output = serde_json::json!({
            "name": "ualink",
            "version": crate::VERSION,
            "crates": {
                "ualink-core": ualink_core::VERSION,
                "ualink-buffer": ualink_buffer::VERSION,
                "ualink-opcua": ualink_opcua::VERSION,
                "ualink-broker": ualink_broker::VERSION,
                "ualink-command": ualink_command::VERSION,
                "ualink-config": ualink_config::VERSION,
            },
            "features": {
                "kafka": cfg!(feature = "kafka"),
                "real-source": cfg!(feature = "real-source"),
            },
            "target": {
                "arch": std::env::consts::ARCH,
                "os": std::env::consts::OS,
            },
        });
        let text = serde_json::to_string_pretty(&output).context("rendering version")?;
        println!("{}", text);
        return Ok(());
    }

    println!("ualink - OPC UA to MQTT/Kafka telemetry gateway");
    println!();
    println!("Version Information:");
    println!("  ualink-bin:     {}", crate::VERSION);
    println!("  ualink-core:    {}", ualink_core::VERSION);
    println!("  ualink-buffer:  {}", ualink_buffer::VERSION);
    println!("  ualink-opcua:   {}", ualink_opcua::VERSION);
    println!("  ualink-broker:  {}", ualink_broker::VERSION);
    println!("  ualink-command: {}", ualink_command::VERSION);
    println!("  ualink-config:  {}", ualink_config::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    println!("Features:");
    println!("  Kafka:        {}", feature_state(cfg!(feature = "kafka")));
    println!("  OPC UA:       {}", feature_state(cfg!(feature = "real-source")));
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
