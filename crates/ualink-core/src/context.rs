// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The explicit gateway context.
//!
//! Settings, diagnostic counters, the metrics registry and the shutdown
//! token are created once at startup and handed to every component through
//! its constructor. Nothing in the gateway reaches for process globals.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::diagnostics::DiagnosticCounters;

// =============================================================================
// Constants
// =============================================================================

/// Default publisher name.
pub const DEFAULT_PUBLISHER_NAME: &str = "UACloudPublisher";

/// Default application URI of the gateway itself.
pub const DEFAULT_APPLICATION_URI: &str = "urn:localhost:UACloudPublisher";

/// Default maximum broker message size in bytes.
pub const DEFAULT_BROKER_MESSAGE_SIZE: usize = 256 * 1024;

/// Bytes reserved per message for broker properties.
pub const MESSAGE_PROPERTY_OVERHEAD: usize = 512;

/// Maximum payload of a command response.
pub const MAX_RESPONSE_PAYLOAD: usize = 128 * 1024 - 256;

/// Default record queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default publishing interval for points that request 0.
pub const DEFAULT_PUBLISHING_INTERVAL_MS: u32 = 1000;

/// Default sampling interval for points that request 0.
pub const DEFAULT_SAMPLING_INTERVAL_MS: u32 = 500;

// =============================================================================
// GatewaySettings
// =============================================================================

/// Runtime settings shared by the pipeline.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Name published in every frame header.
    pub publisher_name: String,
    /// Application URI used for self-diagnostic records.
    pub application_uri: String,
    /// Batching interval. Zero disables the timer.
    pub send_interval: Duration,
    /// Maximum broker message size in bytes. Zero disables the size bound.
    pub broker_message_size: usize,
    /// Record queue capacity.
    pub queue_capacity: usize,
    /// Publishing interval for points that request 0.
    pub default_publishing_interval_ms: u32,
    /// Sampling interval for points that request 0.
    pub default_sampling_interval_ms: u32,
    /// Status codes whose notifications are dropped.
    pub suppressed_status_codes: Vec<u32>,
    /// Maximum command response payload in bytes.
    pub max_response_payload: usize,
    /// Emit dataset metadata per writer.
    pub send_metadata: bool,
    /// Metadata resend period.
    pub metadata_interval: Duration,
    /// Emit periodic status messages.
    pub send_status: bool,
    /// Diagnostics reporting period.
    pub diagnostics_interval: Duration,
}

impl GatewaySettings {
    /// Returns `true` when every record becomes its own frame.
    #[inline]
    pub fn immediate_mode(&self) -> bool {
        self.send_interval.is_zero() && self.broker_message_size == 0
    }

    /// Returns the byte budget for encoded records in one frame.
    pub fn frame_budget(&self) -> usize {
        let size = if self.broker_message_size == 0 {
            DEFAULT_BROKER_MESSAGE_SIZE
        } else {
            self.broker_message_size
        };
        size.saturating_sub(MESSAGE_PROPERTY_OVERHEAD)
    }

    /// Settings tuned for tests: small queue, no timers.
    pub fn for_testing() -> Self {
        Self {
            queue_capacity: 64,
            send_interval: Duration::from_millis(100),
            diagnostics_interval: Duration::from_secs(1),
            ..Default::default()
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            publisher_name: DEFAULT_PUBLISHER_NAME.to_string(),
            application_uri: DEFAULT_APPLICATION_URI.to_string(),
            send_interval: Duration::from_secs(1),
            broker_message_size: DEFAULT_BROKER_MESSAGE_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            default_publishing_interval_ms: DEFAULT_PUBLISHING_INTERVAL_MS,
            default_sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            suppressed_status_codes: Vec::new(),
            max_response_payload: MAX_RESPONSE_PAYLOAD,
            send_metadata: false,
            metadata_interval: Duration::from_secs(30),
            send_status: false,
            diagnostics_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// GatewayContext
// =============================================================================

/// Shared state handed to every component.
///
/// Cloning is cheap; all clones observe the same counters and token.
#[derive(Debug, Clone)]
pub struct GatewayContext {
    settings: Arc<GatewaySettings>,
    diagnostics: Arc<DiagnosticCounters>,
    registry: prometheus::Registry,
    shutdown: CancellationToken,
}

impl GatewayContext {
    /// Creates a context with fresh counters and a fresh shutdown token.
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            settings: Arc::new(settings),
            diagnostics: Arc::new(DiagnosticCounters::new()),
            registry: prometheus::Registry::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a context bound to an existing shutdown token.
    pub fn with_shutdown(settings: GatewaySettings, shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            ..Self::new(settings)
        }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Returns the diagnostic counters.
    pub fn diagnostics(&self) -> &Arc<DiagnosticCounters> {
        &self.diagnostics
    }

    /// Returns the metrics registry.
    pub fn registry(&self) -> &prometheus::Registry {
        &self.registry
    }

    /// Returns the gateway-wide shutdown token.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Returns a token cancelled together with the gateway.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Returns `true` once shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_mode() {
        let mut settings = GatewaySettings::default();
        assert!(!settings.immediate_mode());

        settings.send_interval = Duration::ZERO;
        settings.broker_message_size = 0;
        assert!(settings.immediate_mode());
    }

    #[test]
    fn test_frame_budget() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.frame_budget(), 256 * 1024 - 512);
    }

    #[test]
    fn test_child_token_follows_parent() {
        let ctx = GatewayContext::new(GatewaySettings::for_testing());
        let child = ctx.child_token();
        ctx.shutdown_token().cancel();

        assert!(child.is_cancelled());
        assert!(ctx.is_shutting_down());
    }
}
