// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Periodic keep-alive probing of the session pool.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::{ConnectionManager, KeepAliveOutcome};

/// Drives [`ConnectionManager::probe_sessions`] on a fixed interval.
pub struct KeepAliveMonitor {
    manager: ConnectionManager,
    interval: Duration,
    cancel: CancellationToken,
}

impl KeepAliveMonitor {
    /// Creates a monitor using the manager's keep-alive interval.
    pub fn new(manager: ConnectionManager, cancel: CancellationToken) -> Self {
        let interval = manager.config().keep_alive_interval;
        Self {
            manager,
            interval,
            cancel,
        }
    }

    /// Spawns the probe loop.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; sessions are probed one interval in.
            ticker.tick().await;

            info!(interval_ms = self.interval.as_millis() as u64, "Keep-alive monitor started");

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcomes = self.manager.probe_sessions().await;
                        let reconnects = outcomes
                            .iter()
                            .filter(|(_, o)| *o == KeepAliveOutcome::ReconnectStarted)
                            .count();
                        debug!(sessions = outcomes.len(), reconnects, "Keep-alive round done");
                    }
                }
            }

            info!("Keep-alive monitor stopped");
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::manager::ManagerConfig;
    use crate::simulated::{SimulatedConnector, SimulatedServer};
    use ualink_core::{record_queue, GatewayContext, GatewaySettings, PointSpec, SourceEndpoint};

    #[tokio::test(start_paused = true)]
    async fn test_monitor_triggers_reconnect() {
        let ctx = GatewayContext::new(GatewaySettings::for_testing());
        let connector = SimulatedConnector::new();
        let server = connector.add_server(SimulatedServer::new("opc.tcp://plc:4840", "urn:plc"));
        let (sender, _receiver) = record_queue(10, ctx.diagnostics().clone());
        let manager = ConnectionManager::new(
            ctx.clone(),
            Arc::new(connector),
            sender,
            ManagerConfig::default(),
            None,
        );
        manager
            .publish_point(&SourceEndpoint::new("opc.tcp://plc:4840"), &PointSpec::variable("i=2253"))
            .await
            .unwrap();

        let handle = KeepAliveMonitor::new(manager.clone(), ctx.child_token()).start();
        server.set_healthy(false);

        // Three probes at 5 s, 10 s and 15 s.
        tokio::time::sleep(Duration::from_millis(15_100)).await;
        assert_eq!(server.reconnect_attempts(), 1);
        assert_eq!(manager.reconnecting_count(), 1);

        ctx.shutdown_token().cancel();
        handle.await.unwrap();
    }
}
