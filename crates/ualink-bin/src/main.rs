// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ualink - OPC UA to MQTT/Kafka telemetry gateway
//!
//! Main binary entry point.

use ualink_bin::cli::Cli;
use ualink_bin::commands;
use ualink_bin::error::report_error_and_exit;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = commands::execute(cli).await {
        report_error_and_exit(e);
    }
}
