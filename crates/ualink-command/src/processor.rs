// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Remote command execution against the connection manager.
//!
//! Batch commands report one status line per entry; a failed entry is
//! logged and reported but never stops the remaining entries. Responses are
//! kept under the configured payload limit by the framing helpers in
//! [`crate::response`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use ualink_core::{
    CommandHandler, CommandKind, CommandOutcome, DiagnosticCounters, GatewayContext, GatewayError,
    GatewayResult, PointSpec, PublishNodesRequest, SourceEndpoint,
};
use ualink_opcua::{ConnectionManager, PointSetStore, UnpublishOutcome};

use crate::response::{crop_status, truncate_result, truncate_text};

/// Status returned by `UnpublishAllNodes`.
pub const UNPUBLISH_ALL_STATUS: &str = "All nodes unpublished successfully.";

/// Per-entry results of a batch command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// One status line per entry, in request order.
    pub lines: Vec<String>,
    /// Number of entries that failed.
    pub failures: usize,
}

impl BatchReport {
    fn ok(&mut self, line: String) {
        info!("{}", line);
        self.lines.push(line);
    }

    fn failed(&mut self, line: String) {
        error!("{}", line);
        self.lines.push(line);
        self.failures += 1;
    }

    /// Returns `true` if no entry failed.
    pub fn is_success(&self) -> bool {
        self.failures == 0
    }
}

fn entry_label(spec: &PointSpec) -> &'static str {
    if spec.is_event() {
        "Event"
    } else {
        "Node"
    }
}

// =============================================================================
// CommandProcessor
// =============================================================================

/// Executes remote commands.
#[derive(Clone)]
pub struct CommandProcessor {
    manager: ConnectionManager,
    diagnostics: Arc<DiagnosticCounters>,
    max_response_payload: usize,
}

impl CommandProcessor {
    /// Creates a processor bound to `manager`.
    pub fn new(ctx: &GatewayContext, manager: ConnectionManager) -> Self {
        Self {
            manager,
            diagnostics: ctx.diagnostics().clone(),
            max_response_payload: ctx.settings().max_response_payload,
        }
    }

    /// Overrides the response payload limit.
    pub fn with_max_response_payload(mut self, limit: usize) -> Self {
        self.max_response_payload = limit;
        self
    }

    /// Returns the connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Publishes every entry of a `PublishNodes` payload.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed payload, a blank endpoint
    /// or missing credentials. Entry failures are reported in the status.
    pub async fn publish_nodes(&self, payload: &[u8]) -> GatewayResult<CommandOutcome> {
        let request = parse_request(payload)?;
        request.validate()?;

        let report = self.publish_request(&request).await;
        let status = crop_status(&report.lines, self.max_response_payload)?;
        Ok(CommandOutcome {
            success: report.is_success(),
            status,
        })
    }

    /// Publishes one request entry by entry.
    pub async fn publish_request(&self, request: &PublishNodesRequest) -> BatchReport {
        let endpoint = request.endpoint();
        let mut report = BatchReport::default();

        for spec in request.points() {
            let label = entry_label(&spec);
            match self.manager.publish_point(&endpoint, &spec).await {
                Ok(point) => report.ok(format!(
                    "{} {} on endpoint {} published successfully.",
                    label, point.node_id, endpoint.url
                )),
                Err(e) => report.failed(format!(
                    "{} {} on endpoint {} could not be published: {}",
                    label,
                    spec.node_id,
                    endpoint.url,
                    e.user_message()
                )),
            }
        }

        report
    }

    /// Unpublishes every entry of an `UnpublishNodes` payload.
    ///
    /// Unpublishing a point that is not published succeeds with a no-op
    /// status line.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed payload or a blank
    /// endpoint.
    pub async fn unpublish_nodes(&self, payload: &[u8]) -> GatewayResult<CommandOutcome> {
        let request = parse_request(payload)?;
        if request.endpoint_url.trim().is_empty() {
            return Err(GatewayError::validation("endpointUrl", "must not be empty"));
        }

        let endpoint = SourceEndpoint::new(request.endpoint_url.clone());
        let mut report = BatchReport::default();

        for spec in request.points() {
            let label = entry_label(&spec);
            match self.manager.unpublish_point(&endpoint, &spec).await {
                Ok(UnpublishOutcome::Removed) => report.ok(format!(
                    "{} {} on endpoint {} unpublished successfully.",
                    label, spec.node_id, endpoint.url
                )),
                Ok(UnpublishOutcome::NotPublished) => report.ok(format!(
                    "{} {} on endpoint {} was not published, nothing to unpublish.",
                    label, spec.node_id, endpoint.url
                )),
                Err(e) => report.failed(format!(
                    "{} {} on endpoint {} could not be unpublished: {}",
                    label,
                    spec.node_id,
                    endpoint.url,
                    e.user_message()
                )),
            }
        }

        let status = crop_status(&report.lines, self.max_response_payload)?;
        Ok(CommandOutcome {
            success: report.is_success(),
            status,
        })
    }

    /// Unpublishes everything.
    pub async fn unpublish_all(&self) -> GatewayResult<CommandOutcome> {
        let removed = self.manager.unpublish_all().await;
        info!(points = removed, "{}", UNPUBLISH_ALL_STATUS);
        let (status, _) = truncate_text(UNPUBLISH_ALL_STATUS.to_string(), self.max_response_payload);
        Ok(CommandOutcome::success(status))
    }

    /// Returns the published point set as JSON, without passwords.
    pub async fn get_published_nodes(&self) -> GatewayResult<CommandOutcome> {
        let mut published = self.manager.list_published().await;
        for request in &mut published {
            request.password = None;
        }
        let (status, _) = truncate_result(&published, self.max_response_payload)?;
        Ok(CommandOutcome::success(status))
    }

    /// Returns the diagnostic counters as JSON.
    pub async fn get_info(&self) -> GatewayResult<CommandOutcome> {
        let info = self.diagnostics.snapshot();
        let (status, _) = truncate_result(&info, self.max_response_payload)?;
        Ok(CommandOutcome::success(status))
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Replays a persisted point set.
    ///
    /// Failures are logged and skipped. Returns the number of entries
    /// published.
    pub async fn auto_load(&self, store: &PointSetStore) -> usize {
        let requests = match store.load().await {
            Ok(requests) => requests,
            Err(e) => {
                warn!(path = %store.path().display(), error = %e, "Failed to load point set");
                return 0;
            }
        };

        let mut published = 0;
        for request in &requests {
            if let Err(e) = request.validate() {
                warn!(endpoint = %request.endpoint_url, error = %e, "Skipping invalid point set entry");
                continue;
            }
            let report = self.publish_request(request).await;
            published += report.lines.len() - report.failures;
        }

        info!(
            path = %store.path().display(),
            endpoints = requests.len(),
            points = published,
            "Point set loaded"
        );
        published
    }
}

fn parse_request(payload: &[u8]) -> GatewayResult<PublishNodesRequest> {
    serde_json::from_slice(payload).map_err(|e| GatewayError::validation("payload", e.to_string()))
}

#[async_trait]
impl CommandHandler for CommandProcessor {
    async fn handle(&self, kind: CommandKind, payload: &[u8]) -> GatewayResult<CommandOutcome> {
        match kind {
            CommandKind::PublishNodes => self.publish_nodes(payload).await,
            CommandKind::UnpublishNodes => self.unpublish_nodes(payload).await,
            CommandKind::UnpublishAllNodes => self.unpublish_all().await,
            CommandKind::GetPublishedNodes => self.get_published_nodes().await,
            CommandKind::GetInfo => self.get_info().await,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::CROPPED_NOTICE;
    use serde_json::json;
    use ualink_core::{record_queue, DiagnosticsInfo, GatewaySettings, RecordReceiver, Variant};
    use ualink_opcua::{ManagerConfig, NodeId, SimulatedConnector, SimulatedServer};

    const URL: &str = "opc.tcp://plc:4840";

    struct Fixture {
        processor: CommandProcessor,
        server: Arc<SimulatedServer>,
        _receiver: RecordReceiver,
    }

    fn fixture_with(store: Option<PointSetStore>) -> Fixture {
        let ctx = GatewayContext::new(GatewaySettings::for_testing());
        let connector = SimulatedConnector::new();
        let server = connector.add_server(SimulatedServer::new(URL, "urn:plc"));
        let ns = server.add_namespace("http://example.com/plant");
        server.add_variable(NodeId::string(ns, "Speed"), "Speed", Variant::Int32(10));
        server.add_variable(NodeId::string(ns, "Level"), "Level", Variant::Double(1.5));

        let (sender, receiver) = record_queue(100, ctx.diagnostics().clone());
        let manager = ConnectionManager::new(
            ctx.clone(),
            Arc::new(connector),
            sender,
            ManagerConfig::from_settings(ctx.settings()),
            store,
        );
        Fixture {
            processor: CommandProcessor::new(&ctx, manager),
            server,
            _receiver: receiver,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn payload(value: serde_json::Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }

    fn status_lines(outcome: &CommandOutcome) -> Vec<String> {
        serde_json::from_str(&outcome.status).unwrap()
    }

    #[tokio::test]
    async fn test_publish_nodes_reports_each_entry() {
        let f = fixture();
        let outcome = f
            .processor
            .handle(
                CommandKind::PublishNodes,
                &payload(json!({
                    "endpointUrl": URL,
                    "opcNodes": [
                        { "id": "ns=2;s=Speed" },
                        { "id": "ns=2;s=Missing" },
                        { "id": "ns=2;s=Level", "publishingInterval": 2000 }
                    ]
                })),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        let lines = status_lines(&outcome);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("published successfully"));
        assert!(lines[1].contains("could not be published"));
        assert!(lines[2].contains("published successfully"));
        assert_eq!(f.server.monitored_item_count(), 2);
    }

    #[tokio::test]
    async fn test_publish_nodes_requires_credentials() {
        let f = fixture();
        let err = f
            .processor
            .publish_nodes(&payload(json!({
                "endpointUrl": URL,
                "authMode": "UsernamePassword",
                "opcNodes": [{ "id": "ns=2;s=Speed" }]
            })))
            .await
            .unwrap_err();

        assert_eq!(err.error_type(), "validation");
        assert_eq!(f.server.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_validation_error() {
        let f = fixture();
        let err = f.processor.publish_nodes(b"[1,2").await.unwrap_err();
        assert_eq!(err.error_type(), "validation");
    }

    #[tokio::test]
    async fn test_unpublish_unknown_node_is_noop_success() {
        let f = fixture();
        let outcome = f
            .processor
            .unpublish_nodes(&payload(json!({
                "endpointUrl": URL,
                "opcNodes": [{ "id": "ns=2;s=Speed" }]
            })))
            .await
            .unwrap();

        assert!(outcome.success);
        let lines = status_lines(&outcome);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("nothing to unpublish"));
    }

    #[tokio::test]
    async fn test_unpublish_published_node() {
        let f = fixture();
        let body = payload(json!({
            "endpointUrl": URL,
            "opcNodes": [{ "id": "ns=2;s=Speed" }]
        }));
        f.processor.publish_nodes(&body).await.unwrap();

        let outcome = f.processor.unpublish_nodes(&body).await.unwrap();
        assert!(outcome.success);
        assert!(status_lines(&outcome)[0].contains("unpublished successfully"));
        assert_eq!(f.server.monitored_item_count(), 0);
    }

    #[tokio::test]
    async fn test_unpublish_all_and_list() {
        let f = fixture();
        f.processor
            .publish_nodes(&payload(json!({
                "endpointUrl": URL,
                "opcNodes": [{ "id": "ns=2;s=Speed" }, { "id": "ns=2;s=Level" }]
            })))
            .await
            .unwrap();

        let listed = f.processor.get_published_nodes().await.unwrap();
        let requests: Vec<PublishNodesRequest> = serde_json::from_str(&listed.status).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].opc_nodes.len(), 2);

        let outcome = f.processor.unpublish_all().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.status, UNPUBLISH_ALL_STATUS);

        let listed = f.processor.get_published_nodes().await.unwrap();
        assert_eq!(listed.status, "[]");
    }

    #[tokio::test]
    async fn test_get_published_nodes_hides_password() {
        let f = fixture();
        f.server.require_credentials("operator", "s3cret");
        f.processor
            .publish_nodes(&payload(json!({
                "endpointUrl": URL,
                "authMode": "UsernamePassword",
                "username": "operator",
                "password": "s3cret",
                "opcNodes": [{ "id": "ns=2;s=Speed" }]
            })))
            .await
            .unwrap();

        let listed = f.processor.get_published_nodes().await.unwrap();
        assert!(!listed.status.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_get_info_and_truncation() {
        let f = fixture();
        let outcome = f.processor.get_info().await.unwrap();
        let info: DiagnosticsInfo = serde_json::from_str(&outcome.status).unwrap();
        assert!(!info.connected_to_broker);

        let small = f.processor.clone().with_max_response_payload(16);
        let outcome = small.get_info().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.status.len(), 16);
    }

    #[tokio::test]
    async fn test_publish_response_is_cropped() {
        let f = fixture();
        let nodes: Vec<_> = (0..40).map(|_| json!({ "id": "ns=2;s=Speed" })).collect();
        let processor = f.processor.clone().with_max_response_payload(600);

        let outcome = processor
            .publish_nodes(&payload(json!({ "endpointUrl": URL, "opcNodes": nodes })))
            .await
            .unwrap();

        assert!(outcome.status.len() <= 600);
        let lines = status_lines(&outcome);
        assert_eq!(lines.last().unwrap(), CROPPED_NOTICE);
        assert!(lines.len() < 40);
    }

    #[tokio::test]
    async fn test_auto_load_replays_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = PointSetStore::new(dir.path().join("points.json"));
        let mut request = PublishNodesRequest::new(URL);
        request.opc_nodes = serde_json::from_value(json!([
            { "id": "ns=2;s=Speed" },
            { "id": "ns=2;s=Nope" }
        ]))
        .unwrap();
        store.save(&[request]).await.unwrap();

        let f = fixture_with(None);
        assert_eq!(f.processor.auto_load(&store).await, 1);
        assert_eq!(f.server.monitored_item_count(), 1);
    }
}
