// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway runtime orchestration.
//!
//! Startup order:
//!
//! 1. Context, record queue and metrics registry
//! 2. Broker client and initial connect
//! 3. Publisher, encoder and batching engine
//! 4. Source connector, connection manager and keep-alive monitor
//! 5. Command processor and dispatcher
//! 6. Diagnostics reporter
//! 7. Point-set replay and development points
//!
//! Shutdown cancels the shared token, tears the session pool down without
//! rewriting the point-set file, disconnects the broker and joins the tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ualink_broker::options::DEFAULT_INBOUND_CAPACITY;
use ualink_broker::{
    BrokerOptions, CommandDispatcher, DispatcherConfig, MemoryBrokerClient, MqttBrokerClient,
};
use ualink_buffer::{
    BatchingEngine, DirectPublisher, MessageEncoder, PipelineMetrics, PubSubJsonEncoder, Publisher,
    SpillStore, StoreForwardPublisher,
};
use ualink_command::CommandProcessor;
use ualink_config::{
    BrokerConfig, BrokerKind, ConfigLoader, PublisherStrategy, SourceBackend, UalinkConfig,
};
use ualink_core::{
    record_queue, BrokerClient, DiagnosticCounters, GatewayContext, InboundMessage, OpcNodeEntry,
    PublishNodesRequest,
};
use ualink_opcua::simulated::{demo_server, spawn_random_walk, DEMO_ENDPOINT, DEMO_NAMESPACE};
use ualink_opcua::{
    ConnectionManager, KeepAliveMonitor, ManagerConfig, PointSetStore, SimulatedConnector,
    SimulatedServer, SourceConnector,
};

use crate::diagnostics::DiagnosticsReporter;
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

/// Time allowed for each background task to finish after cancellation.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Period of the development value generator.
const DEV_RANDOM_WALK_PERIOD: Duration = Duration::from_secs(1);

// =============================================================================
// GatewayRuntime
// =============================================================================

/// The main gateway runtime that orchestrates all components.
pub struct GatewayRuntime {
    config: Arc<UalinkConfig>,
    shutdown: ShutdownCoordinator,
    dev_mode: bool,
    skip_connect: bool,
}

impl GatewayRuntime {
    /// Creates a new gateway runtime.
    pub fn new(config: UalinkConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: ShutdownCoordinator::new(),
            dev_mode: false,
            skip_connect: false,
        }
    }

    /// Enables development mode.
    pub fn with_dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Skips the broker connect and the point-set replay.
    pub fn with_skip_connect(mut self, skip: bool) -> Self {
        self.skip_connect = skip;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &UalinkConfig {
        &self.config
    }

    /// Returns the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Runs the gateway until shutdown is signaled.
    pub async fn run(self) -> BinResult<()> {
        info!(
            version = ualink_core::VERSION,
            publisher = %self.config.gateway.publisher_name,
            dev = self.dev_mode,
            "Starting ualink gateway"
        );

        let components = self.initialize_components().await?;
        let result = self.run_main_loop(components).await;

        info!("ualink gateway shutdown complete");
        result
    }

    /// Initializes all gateway components.
    async fn initialize_components(&self) -> BinResult<GatewayComponents> {
        let ctx = GatewayContext::with_shutdown(self.config.to_settings(), self.shutdown.token());
        let diagnostics = ctx.diagnostics().clone();
        let metrics = PipelineMetrics::new(ctx.registry());
        let (sender, receiver) = record_queue(ctx.settings().queue_capacity, diagnostics.clone());
        let mut tasks = Vec::new();

        // Broker
        let (inbound_tx, inbound_rx) = if self.config.broker.command_topic.trim().is_empty() {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel(DEFAULT_INBOUND_CAPACITY);
            (Some(tx), Some(rx))
        };
        let client = build_broker(&self.config.broker, diagnostics.clone(), inbound_tx)?;
        if self.skip_connect {
            warn!("Broker connect skipped, frames will not be delivered");
        } else if let Err(e) = client.connect().await {
            warn!(broker = client.name(), error = %e, "Broker not reachable yet");
        }

        // Publish pipeline
        let publisher = self.build_publisher(client.clone(), diagnostics.clone(), metrics.clone()).await?;
        let encoder: Arc<dyn MessageEncoder> =
            Arc::new(PubSubJsonEncoder::new(self.config.gateway.publisher_name.clone()));
        let engine = BatchingEngine::new(&ctx, receiver, encoder.clone(), publisher, metrics);
        tasks.push(("batching engine", engine.start()));

        // Sources
        let (connector, demo) = self.build_connector()?;
        let store = PointSetStore::new(&self.config.persistence.points_file);
        let manager = ConnectionManager::new(
            ctx.clone(),
            connector,
            sender.clone(),
            self.manager_config(&ctx),
            Some(store.clone()),
        );
        tasks.push((
            "keep-alive monitor",
            KeepAliveMonitor::new(manager.clone(), ctx.child_token()).start(),
        ));

        // Commands
        let processor = CommandProcessor::new(&ctx, manager.clone());
        if let Some(rx) = inbound_rx {
            let dispatcher = CommandDispatcher::new(
                DispatcherConfig {
                    command_topic: self.config.broker.command_topic.clone(),
                    response_topic: self.config.broker.response_topic.clone(),
                    staleness: self.config.broker.command_staleness(),
                },
                Arc::new(processor.clone()),
                client.clone(),
            );
            tasks.push(("command dispatcher", dispatcher.start(rx, ctx.child_token())));
        }

        // Diagnostics
        let reporter = DiagnosticsReporter::new(
            ctx.clone(),
            sender,
            encoder,
            client.clone(),
            self.config.diagnostics.self_records,
        );
        tasks.push(("diagnostics reporter", reporter.start(ctx.child_token())));

        // Points
        if self.config.persistence.auto_load && !self.skip_connect {
            let replayed = processor.auto_load(&store).await;
            info!(path = %store.path().display(), replayed, "Persisted point set replayed");
        }
        if let Some(server) = demo {
            tasks.push((
                "value generator",
                spawn_random_walk(server, DEV_RANDOM_WALK_PERIOD, ctx.child_token()),
            ));
            let report = processor.publish_request(&demo_request()).await;
            for line in &report.lines {
                info!("{}", line);
            }
        }

        Ok(GatewayComponents {
            client,
            manager,
            tasks,
        })
    }

    async fn build_publisher(
        &self,
        client: Arc<dyn BrokerClient>,
        diagnostics: Arc<DiagnosticCounters>,
        metrics: PipelineMetrics,
    ) -> BinResult<Arc<dyn Publisher>> {
        let config = &self.config.publisher;
        match config.strategy {
            PublisherStrategy::Direct => Ok(Arc::new(DirectPublisher::new(client, diagnostics, metrics))),
            PublisherStrategy::StoreForward => {
                let spill = SpillStore::open(&config.spill_dir)
                    .await
                    .map_err(|e| BinError::startup("spill store", e))?;
                info!(dir = %config.spill_dir.display(), drain_batch = config.drain_batch, "Store-and-forward enabled");
                Ok(Arc::new(StoreForwardPublisher::new(
                    client,
                    spill,
                    config.drain_batch,
                    diagnostics,
                    metrics,
                )))
            }
        }
    }

    fn build_connector(&self) -> BinResult<(Arc<dyn SourceConnector>, Option<Arc<SimulatedServer>>)> {
        match self.config.source.backend {
            SourceBackend::Simulated => {
                let connector = SimulatedConnector::new();
                let demo = self.dev_mode.then(|| connector.add_server(demo_server()));
                Ok((Arc::new(connector), demo))
            }
            #[cfg(feature = "real-source")]
            SourceBackend::Opcua => {
                let source = &self.config.source;
                let connector = ualink_opcua::OpcUaConnector::new(ualink_opcua::RealSourceConfig {
                    application_name: self.config.gateway.publisher_name.clone(),
                    application_uri: self.config.gateway.application_uri.clone(),
                    pki_dir: Some(source.pki_dir.clone()),
                    trust_server_certs: source.trust_server_certs,
                    session_timeout_ms: u32::try_from(source.session_timeout_ms).unwrap_or(u32::MAX),
                });
                Ok((Arc::new(connector), None))
            }
            #[cfg(not(feature = "real-source"))]
            SourceBackend::Opcua => Err(BinError::feature_disabled("real-source", "source backend 'opcua'")),
        }
    }

    fn manager_config(&self, ctx: &GatewayContext) -> ManagerConfig {
        let source = &self.config.source;
        ManagerConfig {
            keep_alive_interval: source.keep_alive_interval(),
            max_missed_keep_alives: source.max_missed_keep_alives,
            reconnect_period: source.reconnect_period(),
            ..ManagerConfig::from_settings(ctx.settings())
        }
    }

    /// Waits for shutdown, then stops every component.
    async fn run_main_loop(&self, components: GatewayComponents) -> BinResult<()> {
        info!(broker = components.client.name(), "ualink gateway is ready");
        self.shutdown.wait_for_shutdown().await;

        info!("Shutdown initiated, cleaning up...");
        components.manager.shutdown().await;
        if let Err(e) = components.client.disconnect().await {
            warn!(error = %e, "Broker disconnect failed");
        }

        let joins = components.tasks.into_iter().map(|(name, handle)| async move {
            (name, tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await)
        });
        for (name, result) in join_all(joins).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => warn!(task = name, "Task did not stop in time"),
            }
        }

        Ok(())
    }
}

// =============================================================================
// GatewayComponents
// =============================================================================

/// Handles kept alive for the lifetime of the gateway.
struct GatewayComponents {
    client: Arc<dyn BrokerClient>,
    manager: ConnectionManager,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

// =============================================================================
// Builders
// =============================================================================

/// Maps the broker section onto client options.
pub fn broker_options(config: &BrokerConfig) -> BrokerOptions {
    BrokerOptions {
        url: config.url.clone(),
        port: config.port,
        client_name: config.client_name.clone(),
        username: config.username.clone(),
        password: config.password.expose().to_string(),
        use_tls: config.use_tls,
        message_topic: config.message_topic.clone(),
        metadata_topic: config.metadata_topic.clone(),
        command_topic: config.command_topic.clone(),
        response_topic: config.response_topic.clone(),
        keep_alive: config.keep_alive(),
        reconnect_delay: config.reconnect_delay(),
        ..BrokerOptions::default()
    }
}

/// Creates the broker client selected by `config.kind`.
pub fn build_broker(
    config: &BrokerConfig,
    diagnostics: Arc<DiagnosticCounters>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
) -> BinResult<Arc<dyn BrokerClient>> {
    match config.kind {
        BrokerKind::Memory => {
            let mut client = MemoryBrokerClient::new().with_diagnostics(diagnostics);
            if let Some(inbound) = inbound {
                client = client.with_inbound(inbound);
            }
            Ok(Arc::new(client))
        }
        BrokerKind::Mqtt => Ok(Arc::new(MqttBrokerClient::new(
            broker_options(config),
            diagnostics,
            inbound,
        ))),
        #[cfg(feature = "kafka")]
        BrokerKind::Kafka => Ok(Arc::new(ualink_broker::KafkaBrokerClient::new(
            broker_options(config),
            diagnostics,
            inbound,
        ))),
        #[cfg(not(feature = "kafka"))]
        BrokerKind::Kafka => Err(BinError::feature_disabled("kafka", "broker kind 'kafka'")),
    }
}

/// Publish request for the development server's variables.
fn demo_request() -> PublishNodesRequest {
    let mut request = PublishNodesRequest::new(DEMO_ENDPOINT);
    request.opc_nodes = ["Temperature", "Pressure", "Speed", "Running"]
        .iter()
        .map(|name| OpcNodeEntry {
            id: format!("nsu={};s=Line1.{}", DEMO_NAMESPACE, name),
            heartbeat_interval: if *name == "Running" { 10_000 } else { 0 },
            ..Default::default()
        })
        .collect();
    request
}

/// Forces the in-memory broker and the simulated backend.
fn apply_dev_overrides(config: &mut UalinkConfig) {
    config.broker.kind = BrokerKind::Memory;
    config.source.backend = SourceBackend::Simulated;
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the gateway runtime.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<UalinkConfig>,
    dev_mode: bool,
    skip_connect: bool,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: UalinkConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Enables development mode.
    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Skips the broker connect on startup.
    pub fn skip_connect(mut self, skip: bool) -> Self {
        self.skip_connect = skip;
        self
    }

    /// Builds the runtime.
    ///
    /// In development mode a missing configuration file falls back to the
    /// defaults.
    pub fn build(self) -> BinResult<GatewayRuntime> {
        let mut config = match self.config {
            Some(config) => config,
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::config("No configuration provided"))?;
                if self.dev_mode && !path.exists() {
                    UalinkConfig::default()
                } else {
                    ConfigLoader::new()
                        .with_validation(false)
                        .load(&path)
                        .map_err(|e| BinError::from(e).with_context(format!("loading {}", path.display())))?
                }
            }
        };

        if self.dev_mode {
            apply_dev_overrides(&mut config);
        }
        config.validate()?;

        Ok(GatewayRuntime::new(config)
            .with_dev_mode(self.dev_mode)
            .with_skip_connect(self.skip_connect))
    }
}

// =============================================================================
// Tests
// =============================================================================
