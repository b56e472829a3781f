// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pool entries: sessions, subscriptions and points.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ualink_core::{EventFilterClause, SourceEndpoint};

use crate::router::PointBinding;
use crate::source::SourceSession;

// =============================================================================
// SessionState
// =============================================================================

/// Lifecycle state of a pooled session.
///
/// ```text
/// Disconnected → Connecting → Connected ⇄ Degraded → Reconnecting → Connected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session, or torn down explicitly.
    #[default]
    Disconnected,
    /// Session being opened.
    Connecting,
    /// Session open and answering keep-alives.
    Connected,
    /// At least one keep-alive missed.
    Degraded,
    /// Out of the pool while a reconnect attempt runs.
    Reconnecting,
}

impl SessionState {
    /// Returns `true` if the session serves requests.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    /// Returns `true` while a reconnect runs.
    #[inline]
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

// =============================================================================
// Pool Entries
// =============================================================================

/// Pool-wide session identity.
pub type SessionId = u64;

/// A published point.
#[derive(Debug, Clone)]
pub(crate) struct ManagedPoint {
    pub item_id: u32,
    pub binding: Arc<PointBinding>,
    pub sampling_interval_ms: u32,
    pub heartbeat_interval_ms: u32,
    pub skip_first: bool,
    pub event_filter: Option<Vec<EventFilterClause>>,
}

impl ManagedPoint {
    /// Expanded node id, the point's identity within a session.
    pub fn node_id(&self) -> &str {
        &self.binding.node_id
    }
}

/// A subscription and its points.
#[derive(Debug, Clone)]
pub(crate) struct ManagedSubscription {
    pub id: u32,
    pub publishing_interval_ms: u32,
    pub points: Vec<ManagedPoint>,
}

/// A session to one endpoint.
pub(crate) struct ManagedSession {
    pub id: SessionId,
    pub endpoint: SourceEndpoint,
    pub source: Arc<dyn SourceSession>,
    pub application_uri: String,
    pub namespaces: Vec<String>,
    pub subscriptions: Vec<ManagedSubscription>,
    pub state: SessionState,
    pub missed_keep_alives: u32,
}

impl ManagedSession {
    pub fn key(&self) -> String {
        self.endpoint.key()
    }

    pub fn point_count(&self) -> usize {
        self.subscriptions.iter().map(|s| s.points.len()).sum()
    }

    pub fn points(&self) -> impl Iterator<Item = &ManagedPoint> {
        self.subscriptions.iter().flat_map(|s| s.points.iter())
    }

    pub fn subscription_mut(&mut self, publishing_interval_ms: u32) -> Option<&mut ManagedSubscription> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.publishing_interval_ms == publishing_interval_ms)
    }

    /// Detaches every point with this expanded node id.
    ///
    /// Returns `(subscription_id, point)` pairs.
    pub fn take_points(&mut self, node_id: &str) -> Vec<(u32, ManagedPoint)> {
        let mut taken = Vec::new();
        for subscription in &mut self.subscriptions {
            let (matching, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut subscription.points)
                .into_iter()
                .partition(|p| p.node_id() == node_id);
            subscription.points = kept;
            taken.extend(matching.into_iter().map(|p| (subscription.id, p)));
        }
        taken
    }

    /// Detaches subscriptions left without points, except the one at `keep`.
    pub fn take_empty_subscriptions(&mut self, keep: Option<u32>) -> Vec<u32> {
        let (empty, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subscriptions)
            .into_iter()
            .partition(|s| s.points.is_empty() && Some(s.id) != keep);
        self.subscriptions = kept;
        empty.into_iter().map(|s| s.id).collect()
    }
}

impl fmt::Debug for ManagedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.url)
            .field("state", &self.state)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
