// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process broker client.
//!
//! Keeps every published payload in memory. Used by `--dev` runs and tests;
//! availability can be toggled to exercise the store-and-forward path, and
//! commands can be injected as if they arrived from the broker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use ualink_core::{BrokerClient, DiagnosticCounters, GatewayError, GatewayResult, InboundMessage};

/// A response captured by the memory client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    /// Response topic.
    pub topic: String,
    /// Response payload.
    pub payload: Vec<u8>,
}

impl CapturedResponse {
    /// Parses the payload as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Broker client that records traffic in memory.
pub struct MemoryBrokerClient {
    available: AtomicBool,
    connected: AtomicBool,
    connects: AtomicU64,
    messages: Mutex<Vec<Vec<u8>>>,
    metadata: Mutex<Vec<Vec<u8>>>,
    responses: Mutex<Vec<CapturedResponse>>,
    diagnostics: Option<Arc<DiagnosticCounters>>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
}

impl MemoryBrokerClient {
    /// Creates an available, unconnected client.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            connects: AtomicU64::new(0),
            messages: Mutex::new(Vec::new()),
            metadata: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            diagnostics: None,
            inbound: None,
        }
    }

    /// Reports the connection state into `diagnostics`.
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticCounters>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Routes injected commands into `inbound`.
    pub fn with_inbound(mut self, inbound: mpsc::Sender<InboundMessage>) -> Self {
        self.inbound = Some(inbound);
        self
    }

    /// Makes the broker reachable or unreachable.
    ///
    /// Going unavailable drops the connection; coming back reconnects.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        self.set_connected(available && self.connects.load(Ordering::SeqCst) > 0);
    }

    /// Delivers a command as if it arrived on `topic`.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> bool {
        match &self.inbound {
            Some(inbound) => inbound.try_send(InboundMessage::new(topic, payload)).is_ok(),
            None => false,
        }
    }

    /// Returns the telemetry frames published so far.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.messages.lock().clone()
    }

    /// Returns the metadata messages published so far.
    pub fn metadata(&self) -> Vec<Vec<u8>> {
        self.metadata.lock().clone()
    }

    /// Returns the command responses published so far.
    pub fn responses(&self) -> Vec<CapturedResponse> {
        self.responses.lock().clone()
    }

    /// Returns the number of successful connects.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.set_broker_connected(connected);
        }
    }

    fn check_connected(&self) -> GatewayResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::transport("memory broker unavailable"))
        }
    }
}

impl Default for MemoryBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MemoryBrokerClient {
    async fn connect(&self) -> GatewayResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("memory", "broker unavailable"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.set_connected(true);
        debug!("Connected to memory broker");
        Ok(())
    }

    async fn publish(&self, payload: &[u8]) -> GatewayResult<()> {
        self.check_connected()?;
        self.messages.lock().push(payload.to_vec());
        Ok(())
    }

    async fn publish_metadata(&self, payload: &[u8]) -> GatewayResult<()> {
        self.check_connected()?;
        self.metadata.lock().push(payload.to_vec());
        Ok(())
    }

    async fn publish_response(&self, topic: &str, payload: &[u8]) -> GatewayResult<()> {
        self.check_connected()?;
        self.responses.lock().push(CapturedResponse {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        self.set_connected(false);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
