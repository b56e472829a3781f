// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Command Integration Tests
//!
//! Integration tests for the command channel, from an inbound broker
//! message to the published response:
//!
//! - Publish, unpublish and query commands
//! - Per-entry status lines and overall success
//! - Staleness, malformed payloads and unknown commands
//! - Response cropping and arrival-order handling
//!
//! ## Test Categories
//!
//! - `test_command_publish_*`: `PublishNodes`
//! - `test_command_unpublish_*`: `UnpublishNodes` / `UnpublishAllNodes`
//! - `test_command_query_*`: `GetPublishedNodes` / `GetInfo`
//! - `test_command_envelope_*`: Envelope handling in the dispatcher

use std::time::Duration;

use serde_json::{json, Value};

use ualink_command::{CommandProcessor, CROPPED_NOTICE, UNPUBLISH_ALL_STATUS};
use ualink_core::{AuthMode, Variant};

use ualink_tests::common::{
    assertions::{assert_eventually, frame_value, ResponseAssertions},
    builders::{CommandBuilder, PublishRequestBuilder, RESPONSE_TOPIC},
    fixtures::{ServerFixtures, PLANT_NAMESPACE, PLANT_URL},
    harness::GatewayHarness,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn expanded(name: &str) -> String {
    format!("nsu={};s={}", PLANT_NAMESPACE, name)
}

fn published_line(name: &str) -> String {
    format!(
        "Node {} on endpoint {} published successfully.",
        expanded(name),
        PLANT_URL
    )
}

fn plant_request() -> PublishRequestBuilder {
    PublishRequestBuilder::new(PLANT_URL)
}

// =============================================================================
// PublishNodes Tests
// =============================================================================

#[tokio::test]
async fn test_command_publish_reports_each_entry() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::publish(
        plant_request()
            .node(ServerFixtures::node_id("Speed"))
            .node_with_interval(ServerFixtures::node_id("Level"), 2000),
    )
    .correlation_id("publish-1");
    let response = harness.send(command.build()).await.expect("response");

    response.assert_success();
    response.assert_correlation("publish-1");
    assert_eq!(
        response.status_lines(),
        vec![published_line("Speed"), published_line("Level")]
    );
    assert_eq!(harness.manager.session_count().await, 1);
    assert_eq!(harness.plant.subscription_count(), 2);

    harness.stop().await;
}

#[tokio::test]
async fn test_command_publish_partial_failure() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::publish(
        plant_request()
            .node(ServerFixtures::node_id("Speed"))
            .node(ServerFixtures::node_id("Missing")),
    );
    let response = harness.send(command.build()).await.expect("response");

    response.assert_failure();
    let lines = response.status_lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], published_line("Speed"));
    assert!(
        lines[1].starts_with(&format!(
            "Node {} on endpoint {} could not be published:",
            ServerFixtures::node_id("Missing"),
            PLANT_URL
        )),
        "unexpected line: {}",
        lines[1]
    );

    // The good entry stays published.
    let published = harness.manager.list_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].opc_nodes.len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_command_publish_blank_endpoint_rejected() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::publish(PublishRequestBuilder::new("  ").node("ns=2;s=Speed"));
    let response = harness.send(command.build()).await.expect("response");

    response.assert_failure();
    assert!(response.status_text().contains("endpointUrl"), "{}", response.status_text());
    assert_eq!(harness.manager.session_count().await, 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_command_publish_credentials_missing_rejected() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::publish(
        plant_request()
            .auth_mode(AuthMode::UsernamePassword)
            .node(ServerFixtures::node_id("Speed")),
    );
    let response = harness.send(command.build()).await.expect("response");

    response.assert_failure();
    assert_eq!(harness.plant.connect_count(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_command_publish_then_telemetry_flows() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::publish(plant_request().node(ServerFixtures::node_id("Temperature")));
    harness.send(command.build()).await.expect("response").assert_success();

    harness
        .plant
        .set_value(&ServerFixtures::node("Temperature"), Variant::Double(23.5));
    assert_eventually("temperature published", Duration::from_secs(5), || async {
        harness
            .frames()
            .iter()
            .any(|f| frame_value(f, "Temperature") == Some(json!(23.5)))
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_command_publish_response_cropped() {
    let harness = GatewayHarness::start().await;
    let processor = CommandProcessor::new(&harness.ctx, harness.manager.clone())
        .with_max_response_payload(250);

    let request = plant_request()
        .node(ServerFixtures::node_id("Speed"))
        .node(ServerFixtures::node_id("Level"))
        .node(ServerFixtures::node_id("Temperature"))
        .node(ServerFixtures::node_id("Running"));
    let outcome = processor
        .publish_nodes(request.to_json().to_string().as_bytes())
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(outcome.status.len() <= 250, "status of {} bytes", outcome.status.len());
    let lines: Vec<String> = serde_json::from_str(&outcome.status).unwrap();
    assert!(lines.len() < 5);
    assert_eq!(lines.last().map(String::as_str), Some(CROPPED_NOTICE));
    assert_eq!(harness.plant.monitored_item_count(), 4);

    harness.stop().await;
}

// =============================================================================
// UnpublishNodes Tests
// =============================================================================

#[tokio::test]
async fn test_command_unpublish_reports_each_entry() {
    let harness = GatewayHarness::start().await;
    harness
        .send(CommandBuilder::publish(plant_request().node(ServerFixtures::node_id("Speed"))).build())
        .await
        .expect("response")
        .assert_success();

    let command = CommandBuilder::unpublish(
        plant_request()
            .node(ServerFixtures::node_id("Speed"))
            .node(ServerFixtures::node_id("Level")),
    );
    let response = harness.send(command.build()).await.expect("response");

    response.assert_success();
    assert_eq!(
        response.status_lines(),
        vec![
            format!(
                "Node {} on endpoint {} unpublished successfully.",
                ServerFixtures::node_id("Speed"),
                PLANT_URL
            ),
            format!(
                "Node {} on endpoint {} was not published, nothing to unpublish.",
                ServerFixtures::node_id("Level"),
                PLANT_URL
            ),
        ]
    );
    assert_eq!(harness.manager.session_count().await, 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_command_unpublish_unknown_endpoint_is_noop() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::unpublish(
        PublishRequestBuilder::new("opc.tcp://nowhere:4840").node("ns=2;s=Speed"),
    );
    let response = harness.send(command.build()).await.expect("response");

    response.assert_success();
    assert!(response.status_lines()[0].ends_with("was not published, nothing to unpublish."));

    harness.stop().await;
}

#[tokio::test]
async fn test_command_unpublish_all() {
    let harness = GatewayHarness::start().await;
    for url in [PLANT_URL, ualink_tests::common::fixtures::PACKAGING_URL] {
        let command = CommandBuilder::publish(
            PublishRequestBuilder::new(url).node(ServerFixtures::node_id("Speed")),
        );
        harness.send(command.build()).await.expect("response").assert_success();
    }
    assert_eq!(harness.manager.session_count().await, 2);

    let response = harness
        .send(CommandBuilder::unpublish_all().build())
        .await
        .expect("response");

    response.assert_success();
    assert_eq!(response.status_text(), UNPUBLISH_ALL_STATUS);
    assert_eq!(harness.manager.session_count().await, 0);
    assert!(harness.store.load().await.unwrap().is_empty());

    harness.stop().await;
}

// =============================================================================
// Query Tests
// =============================================================================

#[tokio::test]
async fn test_command_query_published_nodes_hides_password() {
    let harness = GatewayHarness::start().await;
    harness.plant.require_credentials("operator", "secret");

    let command = CommandBuilder::publish(
        plant_request()
            .credentials("operator", "secret")
            .node(ServerFixtures::node_id("Speed")),
    );
    harness.send(command.build()).await.expect("response").assert_success();

    let response = harness
        .send(CommandBuilder::get_published().build())
        .await
        .expect("response");

    response.assert_success();
    let published: Value = serde_json::from_str(&response.status_text()).unwrap();
    let entries = published.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["endpointUrl"], PLANT_URL);
    assert_eq!(entries[0]["username"], "operator");
    assert!(entries[0].get("password").is_none());
    assert_eq!(entries[0]["opcNodes"][0]["id"], expanded("Speed"));

    // The persisted file keeps the credentials for auto-load.
    let saved = harness.store.load().await.unwrap();
    assert_eq!(saved[0].password.as_deref(), Some("secret"));

    harness.stop().await;
}

#[tokio::test]
async fn test_command_query_info_reports_counters() {
    let harness = GatewayHarness::start().await;
    harness
        .send(
            CommandBuilder::publish(
                plant_request()
                    .node(ServerFixtures::node_id("Speed"))
                    .node(ServerFixtures::node_id("Level")),
            )
            .build(),
        )
        .await
        .expect("response");

    let response = harness.send(CommandBuilder::get_info().build()).await.expect("response");

    response.assert_success();
    let info: Value = serde_json::from_str(&response.status_text()).unwrap();
    assert_eq!(info["numberOfOpcSessionsConnected"], 1);
    assert_eq!(info["numberOfOpcMonitoredItemsMonitored"], 2);
    assert_eq!(info["connectedToBroker"], true);
    assert!(info["publisherStartTime"].is_string());

    harness.stop().await;
}

// =============================================================================
// Envelope Tests
// =============================================================================

#[tokio::test]
async fn test_command_envelope_stale_command_discarded() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::publish(plant_request().node(ServerFixtures::node_id("Speed")))
        .aged(Duration::from_secs(60));
    assert!(harness.send(command.build()).await.is_none());

    assert!(harness.broker.responses().is_empty());
    assert_eq!(harness.plant.connect_count(), 0);
    let (received, succeeded, failed, discarded) = harness.dispatcher_stats();
    assert_eq!((received, succeeded, failed, discarded), (1, 0, 0, 1));

    harness.stop().await;
}

#[tokio::test]
async fn test_command_envelope_missing_timestamp_discarded() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::get_info().without_timestamp();
    assert!(harness.send(command.build()).await.is_none());
    assert!(harness.broker.responses().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_command_envelope_malformed_payload() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::get_info().raw(b"{not json".to_vec());
    let response = harness.send(command.build()).await.expect("response");

    response.assert_failure();
    assert_eq!(response.json()["correlationId"], "");
    assert_eq!(response.topic, format!("{}/500/", RESPONSE_TOPIC));

    harness.stop().await;
}

#[tokio::test]
async fn test_command_envelope_unknown_command() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::on_topic("ualink/commands/Reboot").correlation_id("r-1");
    let response = harness.send(command.build()).await.expect("response");

    response.assert_failure();
    response.assert_correlation("r-1");
    assert_eq!(response.status_text(), "Unknown command ualink/commands/Reboot");

    harness.stop().await;
}

#[tokio::test]
async fn test_command_envelope_routes_by_command_field() {
    let harness = GatewayHarness::start().await;

    let command = CommandBuilder::on_topic("ualink/commands/legacy").body(json!({ "command": "GetInfo" }));
    let response = harness.send(command.build()).await.expect("response");

    response.assert_success();
    let info: Value = serde_json::from_str(&response.status_text()).unwrap();
    assert!(info.get("enqueueCount").is_some());

    harness.stop().await;
}

#[tokio::test]
async fn test_command_envelope_handled_in_arrival_order() {
    let harness = GatewayHarness::start().await;

    let publish = CommandBuilder::publish(plant_request().node(ServerFixtures::node_id("Speed")))
        .correlation_id("first")
        .build();
    let query = CommandBuilder::get_published().correlation_id("second").build();
    assert!(harness.broker.inject(publish.topic, publish.payload));
    assert!(harness.broker.inject(query.topic, query.payload));

    assert_eventually("both responses", Duration::from_secs(5), || async {
        harness.broker.responses().len() == 2
    })
    .await;
    let responses = harness.broker.responses();
    responses[0].assert_correlation("first");
    responses[1].assert_correlation("second");

    let published: Value = serde_json::from_str(&responses[1].status_text()).unwrap();
    assert_eq!(published[0]["opcNodes"][0]["id"], expanded("Speed"));

    harness.stop().await;
}
