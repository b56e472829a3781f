// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! [`GatewayHarness`] wires a complete gateway in-process: two simulated
//! servers, the connection manager, the batching engine with the PubSub
//! JSON encoder, a memory broker and the command dispatcher. Everything
//! runs on the test's runtime and is torn down by [`GatewayHarness::stop`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use ualink_broker::options::DEFAULT_INBOUND_CAPACITY;
use ualink_broker::{
    CapturedResponse, CommandDispatcher, DispatcherConfig, DispatcherStats, MemoryBrokerClient,
};
use ualink_buffer::{
    BatchingEngine, DirectPublisher, PipelineMetrics, PubSubJsonEncoder, Publisher, SpillStore,
    StoreForwardPublisher,
};
use ualink_command::CommandProcessor;
use ualink_core::{
    record_queue, BrokerClient, GatewayContext, GatewaySettings, InboundMessage,
};
use ualink_opcua::{
    ConnectionManager, ManagerConfig, PointSetStore, SimulatedConnector, SimulatedServer,
};

use super::assertions::wait_until;
use super::builders::{COMMAND_TOPIC, RESPONSE_TOPIC};
use super::fixtures::ServerFixtures;

/// How long [`GatewayHarness::send`] waits for a command to be handled.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// HarnessConfig
// =============================================================================

/// Configuration for the gateway harness.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Gateway settings.
    pub settings: GatewaySettings,
    /// Use the store-and-forward publisher.
    pub store_forward: bool,
    /// Write the point set through to a file.
    pub persist: bool,
    /// Command staleness window.
    pub staleness: Duration,
    /// Connection manager settings; `None` derives them from `settings`.
    pub manager: Option<ManagerConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            settings: GatewaySettings::for_testing(),
            store_forward: false,
            persist: true,
            staleness: Duration::from_secs(15),
            manager: None,
        }
    }
}

impl HarnessConfig {
    /// Sets the gateway settings.
    pub fn settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Enables the store-and-forward publisher.
    pub fn store_forward(mut self) -> Self {
        self.store_forward = true;
        self
    }

    /// Disables point-set persistence.
    pub fn no_persistence(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Sets the connection manager settings.
    pub fn manager(mut self, config: ManagerConfig) -> Self {
        self.manager = Some(config);
        self
    }
}

// =============================================================================
// GatewayHarness
// =============================================================================

/// A fully wired in-process gateway.
pub struct GatewayHarness {
    /// Shared context.
    pub ctx: GatewayContext,
    /// Broker capturing frames and responses.
    pub broker: Arc<MemoryBrokerClient>,
    /// Server at [`PLANT_URL`](super::fixtures::PLANT_URL).
    pub plant: Arc<SimulatedServer>,
    /// Server at [`PACKAGING_URL`](super::fixtures::PACKAGING_URL).
    pub packaging: Arc<SimulatedServer>,
    /// Session pool.
    pub manager: ConnectionManager,
    /// Command processor.
    pub processor: CommandProcessor,
    /// Point-set file.
    pub store: PointSetStore,
    /// Spill directory of the store-and-forward publisher.
    pub spill_dir: PathBuf,
    stats: Arc<DispatcherStats>,
    tasks: Vec<JoinHandle<()>>,
    _temp_dir: TempDir,
}

impl GatewayHarness {
    /// Starts a harness with default settings.
    pub async fn start() -> Self {
        Self::start_with(HarnessConfig::default()).await
    }

    /// Starts a harness.
    pub async fn start_with(config: HarnessConfig) -> Self {
        super::init_test_logging();
        let temp_dir = super::temp_test_dir("ualink_harness_");
        let spill_dir = temp_dir.path().join("spill");
        let store = PointSetStore::new(temp_dir.path().join("points.json"));

        let ctx = GatewayContext::new(config.settings);
        let (sender, receiver) = record_queue(ctx.settings().queue_capacity, ctx.diagnostics().clone());
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(DEFAULT_INBOUND_CAPACITY);

        let broker = Arc::new(
            MemoryBrokerClient::new()
                .with_diagnostics(ctx.diagnostics().clone())
                .with_inbound(inbound_tx),
        );
        broker.connect().await.expect("memory broker connects");

        let metrics = PipelineMetrics::new(ctx.registry());
        let publisher: Arc<dyn Publisher> = if config.store_forward {
            let spill = SpillStore::open(spill_dir.clone())
                .await
                .expect("spill directory opens");
            Arc::new(StoreForwardPublisher::new(
                broker.clone(),
                spill,
                1,
                ctx.diagnostics().clone(),
                metrics.clone(),
            ))
        } else {
            Arc::new(DirectPublisher::new(
                broker.clone(),
                ctx.diagnostics().clone(),
                metrics.clone(),
            ))
        };

        let mut tasks = Vec::new();
        let encoder = Arc::new(PubSubJsonEncoder::new(ctx.settings().publisher_name.clone()));
        tasks.push(BatchingEngine::new(&ctx, receiver, encoder, publisher, metrics).start());

        let connector = SimulatedConnector::new();
        let plant = connector.add_server(ServerFixtures::plant());
        let packaging = connector.add_server(ServerFixtures::packaging());
        let manager_config = config
            .manager
            .unwrap_or_else(|| ManagerConfig::from_settings(ctx.settings()));
        let manager = ConnectionManager::new(
            ctx.clone(),
            Arc::new(connector),
            sender,
            manager_config,
            config.persist.then(|| store.clone()),
        );

        let processor = CommandProcessor::new(&ctx, manager.clone());
        let dispatcher = CommandDispatcher::new(
            DispatcherConfig {
                command_topic: COMMAND_TOPIC.to_string(),
                response_topic: RESPONSE_TOPIC.to_string(),
                staleness: config.staleness,
            },
            Arc::new(processor.clone()),
            broker.clone(),
        );
        let stats = dispatcher.stats();
        tasks.push(dispatcher.start(inbound_rx, ctx.child_token()));

        Self {
            ctx,
            broker,
            plant,
            packaging,
            manager,
            processor,
            store,
            spill_dir,
            stats,
            tasks,
            _temp_dir: temp_dir,
        }
    }

    /// Delivers a command and waits until the dispatcher has handled it.
    ///
    /// Returns the response, or `None` if the command was discarded.
    pub async fn send(&self, message: InboundMessage) -> Option<CapturedResponse> {
        let (_, _, _, discarded_before) = self.stats.snapshot();
        let handled_before = self.handled();
        let responses_before = self.broker.responses().len();
        assert!(
            self.broker.inject(message.topic, message.payload),
            "inbound channel closed"
        );

        let handled = wait_until(COMMAND_TIMEOUT, || async { self.handled() > handled_before }).await;
        assert!(handled, "Command not handled within {:?}", COMMAND_TIMEOUT);

        let (_, _, _, discarded_now) = self.stats.snapshot();
        if discarded_now > discarded_before {
            return None;
        }

        // The counters move before the response is published.
        let published = wait_until(COMMAND_TIMEOUT, || async {
            self.broker.responses().len() > responses_before
        })
        .await;
        assert!(published, "Response not published within {:?}", COMMAND_TIMEOUT);
        self.broker.responses().get(responses_before).cloned()
    }

    fn handled(&self) -> u64 {
        let (_, succeeded, failed, discarded) = self.stats.snapshot();
        succeeded + failed + discarded
    }

    /// Dispatcher counters `(received, succeeded, failed, discarded)`.
    pub fn dispatcher_stats(&self) -> (u64, u64, u64, u64) {
        self.stats.snapshot()
    }

    /// Telemetry frames received by the broker.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.broker.messages()
    }

    /// Waits until the broker has received at least `count` frames.
    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let reached = wait_until(timeout, || async { self.broker.messages().len() >= count }).await;
        assert!(
            reached,
            "Expected {} frames within {:?}, got {}",
            count,
            timeout,
            self.broker.messages().len()
        );
        self.broker.messages()
    }

    /// Cancels every task and closes every session.
    pub async fn stop(self) {
        debug!(
            frames = self.broker.messages().len(),
            responses = self.broker.responses().len(),
            "Stopping gateway harness"
        );
        self.ctx.shutdown_token().cancel();
        self.manager.shutdown().await;
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}
