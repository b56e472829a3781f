// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection manager.
//!
//! Owns the session pool: at most one session per endpoint, at most one
//! subscription per publishing interval within a session, and at most one
//! point per resolved node id within a session. Every pool mutation runs
//! under one async mutex.
//!
//! # Keep-alive and reconnect
//!
//! The keep-alive monitor probes each live session periodically. A session
//! that misses `max_missed_keep_alives` probes in a row is moved out of the
//! live pool and a reconnect task retries it every `reconnect_period`. An
//! in-flight set guarantees one reconnect task per session. The retries run
//! off the pool mutex; only the final commit takes it again.
//!
//! While reconnecting, a session is invisible to `list_published` and to
//! publish requests, but unpublish requests still reach it so removed
//! points do not come back when it returns. If the endpoint was republished
//! on a new session in the meantime, the returning session's missing points
//! are merged into the new one and the old session is closed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ualink_core::{
    GatewayContext, GatewayError, GatewayResult, GatewaySettings, OpcEventEntry, OpcNodeEntry,
    PointSpec, PublishNodesRequest, RecordSender, SourceEndpoint,
};

use crate::heartbeat::HeartbeatScheduler;
use crate::node_id::{ExpandedNodeId, NodeId};
use crate::persistence::PointSetStore;
use crate::router::{NotificationRouter, NotificationSink, PointBinding};
use crate::session::{ManagedPoint, ManagedSession, ManagedSubscription, SessionId, SessionState};
use crate::source::{MonitorRequest, SourceConnector, SourceSession};

// =============================================================================
// Configuration
// =============================================================================

/// Default keep-alive probe interval.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(5000);

/// Default number of missed probes before a reconnect.
pub const DEFAULT_MAX_MISSED_KEEP_ALIVES: u32 = 3;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_PERIOD: Duration = Duration::from_millis(10_000);

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Publishing interval used when a request gives 0.
    pub default_publishing_interval_ms: u32,
    /// Sampling interval used when a request gives 0.
    pub default_sampling_interval_ms: u32,
    /// Keep-alive probe interval.
    pub keep_alive_interval: Duration,
    /// Consecutive missed probes that trigger a reconnect.
    pub max_missed_keep_alives: u32,
    /// Delay between reconnect attempts.
    pub reconnect_period: Duration,
}

impl ManagerConfig {
    /// Takes the interval defaults from the gateway settings.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            default_publishing_interval_ms: settings.default_publishing_interval_ms,
            default_sampling_interval_ms: settings.default_sampling_interval_ms,
            ..Self::default()
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_publishing_interval_ms: ualink_core::context::DEFAULT_PUBLISHING_INTERVAL_MS,
            default_sampling_interval_ms: ualink_core::context::DEFAULT_SAMPLING_INTERVAL_MS,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            max_missed_keep_alives: DEFAULT_MAX_MISSED_KEEP_ALIVES,
            reconnect_period: DEFAULT_RECONNECT_PERIOD,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPoint {
    /// Resolved node id, expanded form.
    pub node_id: String,
    /// Display name read from the server.
    pub display_name: String,
    /// `true` if an existing point for the same node was replaced.
    pub replaced: bool,
}

/// Result of an unpublish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpublishOutcome {
    /// The point was removed.
    Removed,
    /// No such point was published.
    NotPublished,
}

/// Result of a keep-alive report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveOutcome {
    /// Probe answered.
    Healthy,
    /// Probe missed; carries the consecutive miss count.
    Missed(u32),
    /// Miss limit reached and a reconnect task was started.
    ReconnectStarted,
    /// The session is not in the live pool.
    Unknown,
}

// =============================================================================
// Pool
// =============================================================================

#[derive(Default)]
struct Pool {
    /// Live sessions by endpoint key.
    sessions: HashMap<String, ManagedSession>,
    /// Sessions out of the pool while reconnecting.
    detached: HashMap<SessionId, ManagedSession>,
}

impl Pool {
    fn session_mut(&mut self, key: &str) -> Option<&mut ManagedSession> {
        if self.sessions.contains_key(key) {
            self.sessions.get_mut(key)
        } else {
            self.detached.values_mut().find(|s| s.key() == key)
        }
    }

    /// Removes a session wherever it is. The flag is `true` for live sessions.
    fn take(&mut self, session_id: SessionId) -> Option<(ManagedSession, bool)> {
        if let Some(key) = self
            .sessions
            .iter()
            .find(|(_, s)| s.id == session_id)
            .map(|(k, _)| k.clone())
        {
            return self.sessions.remove(&key).map(|s| (s, true));
        }
        self.detached.remove(&session_id).map(|s| (s, false))
    }

    fn put_back(&mut self, session: ManagedSession, live: bool) {
        if live {
            self.sessions.insert(session.key(), session);
        } else {
            self.detached.insert(session.id, session);
        }
    }

    fn requests(&self, include_detached: bool) -> Vec<PublishNodesRequest> {
        let mut sessions: Vec<&ManagedSession> = self.sessions.values().collect();
        if include_detached {
            sessions.extend(self.detached.values());
        }
        sessions.sort_by_key(|s| s.key());
        sessions
            .into_iter()
            .filter(|s| s.point_count() > 0)
            .map(request_for)
            .collect()
    }
}

fn request_for(session: &ManagedSession) -> PublishNodesRequest {
    let mut request = PublishNodesRequest::new(session.endpoint.url.clone());
    request.auth_mode = session.endpoint.auth_mode;
    if let Some(credentials) = &session.endpoint.credentials {
        request.username = Some(credentials.username.clone());
        request.password = Some(credentials.password.clone());
    }

    for subscription in &session.subscriptions {
        for point in &subscription.points {
            match &point.event_filter {
                Some(filter) => request.opc_events.push(OpcEventEntry {
                    id: point.node_id().to_string(),
                    filter: filter.clone(),
                }),
                None => request.opc_nodes.push(OpcNodeEntry {
                    id: point.node_id().to_string(),
                    sampling_interval: point.sampling_interval_ms,
                    publishing_interval: subscription.publishing_interval_ms,
                    heartbeat_interval: point.heartbeat_interval_ms,
                    skip_first: point.skip_first,
                }),
            }
        }
    }
    request
}

fn resolve_node(
    endpoint: &str,
    node_id: &str,
    is_event: bool,
    namespaces: &[String],
) -> GatewayResult<NodeId> {
    let trimmed = node_id.trim();
    if trimmed.is_empty() {
        return if is_event {
            Ok(NodeId::SERVER)
        } else {
            Err(GatewayError::resolution(endpoint, node_id, "empty node id"))
        };
    }

    trimmed
        .parse::<ExpandedNodeId>()
        .and_then(|expanded| expanded.resolve(namespaces))
        .map_err(|e| GatewayError::resolution(endpoint, node_id, e.reason))
}

// =============================================================================
// ConnectionManager
// =============================================================================

struct Inner {
    ctx: GatewayContext,
    config: ManagerConfig,
    connector: Arc<dyn SourceConnector>,
    router: NotificationRouter,
    heartbeats: HeartbeatScheduler,
    store: Option<PointSetStore>,
    pool: Mutex<Pool>,
    reconnecting: parking_lot::Mutex<HashSet<SessionId>>,
    next_session_id: AtomicU64,
}

/// Session pool and point lifecycle.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager that routes notifications into `sender`.
    ///
    /// With a `store`, the published point set is written through after
    /// every change.
    pub fn new(
        ctx: GatewayContext,
        connector: Arc<dyn SourceConnector>,
        sender: RecordSender,
        config: ManagerConfig,
        store: Option<PointSetStore>,
    ) -> Self {
        let router = NotificationRouter::new(sender.clone(), &ctx.settings().suppressed_status_codes);
        let heartbeats = HeartbeatScheduler::new(sender, ctx.child_token());
        Self {
            inner: Arc::new(Inner {
                ctx,
                config,
                connector,
                router,
                heartbeats,
                store,
                pool: Mutex::new(Pool::default()),
                reconnecting: parking_lot::Mutex::new(HashSet::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the settings.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Returns the notification router.
    pub fn router(&self) -> &NotificationRouter {
        &self.inner.router
    }

    /// Returns the point set store, if any.
    pub fn store(&self) -> Option<&PointSetStore> {
        self.inner.store.as_ref()
    }

    // =========================================================================
    // Publish
    // =========================================================================

    /// Publishes a point, opening a session and a subscription as needed.
    ///
    /// # Errors
    ///
    /// - Connection error if no session can be opened.
    /// - Resolution error if the node id cannot be resolved.
    pub async fn publish_point(
        &self,
        endpoint: &SourceEndpoint,
        spec: &PointSpec,
    ) -> GatewayResult<PublishedPoint> {
        let mut pool = self.inner.pool.lock().await;
        let result = self.publish_locked(&mut pool, endpoint, spec).await;

        match &result {
            Ok(point) => {
                info!(
                    endpoint = %endpoint.url,
                    node_id = %point.node_id,
                    replaced = point.replaced,
                    "Point published"
                );
                self.persist_locked(&pool).await;
            }
            Err(e) => {
                warn!(endpoint = %endpoint.url, node_id = %spec.node_id, error = %e, "Point publish failed");
                if let Some(id) = pool.sessions.get(&endpoint.key()).map(|s| s.id) {
                    self.prune_locked(&mut pool, id).await;
                }
            }
        }

        self.update_counts(&pool);
        result
    }

    async fn publish_locked(
        &self,
        pool: &mut Pool,
        endpoint: &SourceEndpoint,
        spec: &PointSpec,
    ) -> GatewayResult<PublishedPoint> {
        let key = endpoint.key();
        if !pool.sessions.contains_key(&key) {
            let session = self.open_session(endpoint).await?;
            pool.sessions.insert(key.clone(), session);
        }
        let session = pool
            .sessions
            .get_mut(&key)
            .ok_or_else(|| GatewayError::connection(&endpoint.url, "session not in pool"))?;

        let resolved = resolve_node(&endpoint.url, &spec.node_id, spec.is_event(), &session.namespaces)?;
        let expanded = resolved.to_expanded(&session.namespaces);
        let display_name = session.source.read_display_name(&resolved).await?;

        let publishing_interval_ms = match spec.publishing_interval_ms {
            0 => self.inner.config.default_publishing_interval_ms,
            ms => ms,
        };
        let sampling_interval_ms = match spec.sampling_interval_ms {
            0 => self.inner.config.default_sampling_interval_ms,
            ms => ms,
        };

        let subscription_id = match session.subscription_mut(publishing_interval_ms) {
            Some(subscription) => subscription.id,
            None => {
                let id = session.source.create_subscription(publishing_interval_ms).await?;
                debug!(endpoint = %endpoint.url, subscription_id = id, publishing_interval_ms, "Subscription created");
                session.subscriptions.push(ManagedSubscription {
                    id,
                    publishing_interval_ms,
                    points: Vec::new(),
                });
                id
            }
        };

        let binding = Arc::new(PointBinding::new(
            session.endpoint.url.clone(),
            expanded.clone(),
            session.application_uri.clone(),
            publishing_interval_ms,
            display_name.clone(),
        ));

        // Armed before the item exists so the initial notification is caught.
        let was_armed = self.inner.router.is_skip_armed(&binding);
        if spec.skip_first && !spec.is_event() {
            self.inner.router.arm_skip_first(&binding);
        } else {
            self.inner.router.disarm_skip_first(&binding);
        }

        let request = MonitorRequest {
            node_id: resolved.clone(),
            sampling_interval_ms,
            event_filter: spec.event_filter.clone(),
        };
        let sink = NotificationSink::new(self.inner.router.clone(), binding.clone());
        let item_id = match session.source.create_monitored_item(subscription_id, request, sink).await {
            Ok(id) => id,
            Err(e) => {
                if was_armed {
                    self.inner.router.arm_skip_first(&binding);
                } else {
                    self.inner.router.disarm_skip_first(&binding);
                }
                return Err(e);
            }
        };

        // The existing point stays live until its replacement is monitored.
        let replaced = session.take_points(&expanded);
        for (old_subscription_id, point) in &replaced {
            self.release_point(session.id, session.source.as_ref(), *old_subscription_id, point)
                .await;
        }
        for id in session.take_empty_subscriptions(Some(subscription_id)) {
            if let Err(e) = session.source.delete_subscription(id).await {
                warn!(subscription_id = id, error = %e, "Subscription delete failed");
            }
        }

        if spec.heartbeat_interval_ms > 0 && !spec.is_event() {
            self.inner.heartbeats.start(
                session.id,
                binding.clone(),
                resolved,
                session.source.clone(),
                Duration::from_millis(u64::from(spec.heartbeat_interval_ms)),
            );
        }

        let point = ManagedPoint {
            item_id,
            binding,
            sampling_interval_ms,
            heartbeat_interval_ms: spec.heartbeat_interval_ms,
            skip_first: spec.skip_first,
            event_filter: spec.event_filter.clone(),
        };
        if let Some(subscription) = session.subscription_mut(publishing_interval_ms) {
            subscription.points.push(point);
        }

        Ok(PublishedPoint {
            node_id: expanded,
            display_name,
            replaced: !replaced.is_empty(),
        })
    }

    async fn open_session(&self, endpoint: &SourceEndpoint) -> GatewayResult<ManagedSession> {
        info!(
            endpoint = %endpoint.url,
            auth_mode = %endpoint.auth_mode,
            backend = self.inner.connector.name(),
            state = %SessionState::Connecting,
            "Opening source session"
        );
        let source = self.inner.connector.connect(endpoint).await?;
        let session = ManagedSession {
            id: self.inner.next_session_id.fetch_add(1, Ordering::Relaxed),
            endpoint: endpoint.clone(),
            application_uri: source.application_uri(),
            namespaces: source.namespace_array(),
            source,
            subscriptions: Vec::new(),
            state: SessionState::Connected,
            missed_keep_alives: 0,
        };
        info!(
            endpoint = %endpoint.url,
            session_id = session.id,
            application_uri = %session.application_uri,
            "Source session connected"
        );
        Ok(session)
    }

    /// Stops a detached point's heartbeat and deletes its item.
    ///
    /// The skip-first gate is shared with any replacement point and is left
    /// to the caller.
    async fn release_point(
        &self,
        session_id: SessionId,
        source: &dyn SourceSession,
        subscription_id: u32,
        point: &ManagedPoint,
    ) {
        self.inner.heartbeats.stop(session_id, point.node_id());
        if let Err(e) = source.delete_monitored_item(subscription_id, point.item_id).await {
            warn!(node_id = %point.node_id(), error = %e, "Monitored item delete failed");
        }
    }

    // =========================================================================
    // Unpublish
    // =========================================================================

    /// Unpublishes a point, tearing down its subscription and session when
    /// they become empty. An unknown point is not an error.
    ///
    /// # Errors
    ///
    /// Returns a resolution error if the node id cannot be parsed.
    pub async fn unpublish_point(
        &self,
        endpoint: &SourceEndpoint,
        spec: &PointSpec,
    ) -> GatewayResult<UnpublishOutcome> {
        let mut pool = self.inner.pool.lock().await;
        let Some(session) = pool.session_mut(&endpoint.key()) else {
            return Ok(UnpublishOutcome::NotPublished);
        };

        let resolved = resolve_node(&endpoint.url, &spec.node_id, spec.is_event(), &session.namespaces)?;
        let expanded = resolved.to_expanded(&session.namespaces);
        let removed = session.take_points(&expanded);
        if removed.is_empty() {
            return Ok(UnpublishOutcome::NotPublished);
        }

        let session_id = session.id;
        let source = session.source.clone();
        for (subscription_id, point) in &removed {
            self.inner.router.disarm_skip_first(&point.binding);
            self.release_point(session_id, source.as_ref(), *subscription_id, point)
                .await;
        }
        info!(endpoint = %endpoint.url, node_id = %expanded, "Point unpublished");

        self.prune_locked(&mut pool, session_id).await;
        self.update_counts(&pool);
        self.persist_locked(&pool).await;
        Ok(UnpublishOutcome::Removed)
    }

    /// Unpublishes every point and closes every session.
    ///
    /// Returns the number of points removed.
    pub async fn unpublish_all(&self) -> usize {
        let mut pool = self.inner.pool.lock().await;
        let removed = self.close_all_locked(&mut pool).await;
        info!(points = removed, "All points unpublished");
        self.update_counts(&pool);
        self.persist_locked(&pool).await;
        removed
    }

    /// Closes every session without touching the persisted point set.
    pub async fn shutdown(&self) {
        let mut pool = self.inner.pool.lock().await;
        let points = self.close_all_locked(&mut pool).await;
        self.update_counts(&pool);
        info!(points, "Connection manager stopped");
    }

    async fn close_all_locked(&self, pool: &mut Pool) -> usize {
        let mut sessions: Vec<ManagedSession> = pool.sessions.drain().map(|(_, s)| s).collect();
        sessions.extend(pool.detached.drain().map(|(_, s)| s));

        let mut removed = 0;
        for session in sessions {
            removed += session.point_count();
            for subscription in &session.subscriptions {
                if let Err(e) = session.source.delete_subscription(subscription.id).await {
                    debug!(subscription_id = subscription.id, error = %e, "Subscription delete failed");
                }
            }
            self.teardown(session).await;
        }

        self.inner.heartbeats.stop_all();
        self.inner.router.clear_skip_first();
        removed
    }

    /// Deletes empty subscriptions of a session and closes it if none remain.
    async fn prune_locked(&self, pool: &mut Pool, session_id: SessionId) {
        let Some((mut session, live)) = pool.take(session_id) else {
            return;
        };

        for id in session.take_empty_subscriptions(None) {
            if let Err(e) = session.source.delete_subscription(id).await {
                warn!(subscription_id = id, error = %e, "Subscription delete failed");
            }
        }

        if session.subscriptions.is_empty() {
            self.teardown(session).await;
        } else {
            pool.put_back(session, live);
        }
    }

    async fn teardown(&self, mut session: ManagedSession) {
        self.inner.heartbeats.stop_session(session.id);
        if let Err(e) = session.source.close().await {
            debug!(endpoint = %session.endpoint.url, error = %e, "Session close failed");
        }
        session.state = SessionState::Disconnected;
        info!(endpoint = %session.endpoint.url, session_id = session.id, state = %session.state, "Source session closed");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the live published point set, one request per endpoint.
    pub async fn list_published(&self) -> Vec<PublishNodesRequest> {
        self.inner.pool.lock().await.requests(false)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.pool.lock().await.sessions.len()
    }

    /// State of the session for `url`, live or reconnecting.
    pub async fn session_state(&self, url: &str) -> Option<SessionState> {
        let mut pool = self.inner.pool.lock().await;
        pool.session_mut(&ualink_core::endpoint_key(url)).map(|s| s.state)
    }

    /// Number of sessions with a reconnect task in flight.
    pub fn reconnecting_count(&self) -> usize {
        self.inner.reconnecting.lock().len()
    }

    fn update_counts(&self, pool: &Pool) {
        let subscriptions = pool.sessions.values().map(|s| s.subscriptions.len()).sum();
        let items = pool.sessions.values().map(ManagedSession::point_count).sum();
        self.inner
            .ctx
            .diagnostics()
            .set_pool_counts(pool.sessions.len(), subscriptions, items);
    }

    async fn persist_locked(&self, pool: &Pool) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.save(&pool.requests(true)).await {
                error!(path = %store.path().display(), error = %e, "Cannot persist published points");
            }
        }
    }

    // =========================================================================
    // Keep-alive
    // =========================================================================

    /// Probes every live session and reports the results.
    ///
    /// Probes run without holding the pool lock.
    pub async fn probe_sessions(&self) -> Vec<(SessionId, KeepAliveOutcome)> {
        let targets: Vec<(SessionId, Arc<dyn SourceSession>)> = {
            let pool = self.inner.pool.lock().await;
            pool.sessions.values().map(|s| (s.id, s.source.clone())).collect()
        };

        let mut outcomes = Vec::with_capacity(targets.len());
        for (id, source) in targets {
            let healthy = source.check_keep_alive().await;
            outcomes.push((id, self.report_keep_alive(id, healthy).await));
        }
        outcomes
    }

    /// Records one keep-alive result for a live session.
    pub async fn report_keep_alive(&self, session_id: SessionId, healthy: bool) -> KeepAliveOutcome {
        let mut pool = self.inner.pool.lock().await;
        let Some(key) = pool
            .sessions
            .iter()
            .find(|(_, s)| s.id == session_id)
            .map(|(k, _)| k.clone())
        else {
            return KeepAliveOutcome::Unknown;
        };
        let Some(session) = pool.sessions.get_mut(&key) else {
            return KeepAliveOutcome::Unknown;
        };

        if healthy {
            if session.missed_keep_alives > 0 {
                info!(endpoint = %session.endpoint.url, "Source session keep-alive recovered");
            }
            session.missed_keep_alives = 0;
            session.state = SessionState::Connected;
            return KeepAliveOutcome::Healthy;
        }

        session.missed_keep_alives += 1;
        session.state = SessionState::Degraded;
        let missed = session.missed_keep_alives;
        warn!(
            endpoint = %session.endpoint.url,
            missed,
            limit = self.inner.config.max_missed_keep_alives,
            "Source session missed keep-alive"
        );

        if missed < self.inner.config.max_missed_keep_alives {
            return KeepAliveOutcome::Missed(missed);
        }
        if !self.inner.reconnecting.lock().insert(session_id) {
            return KeepAliveOutcome::Missed(missed);
        }

        let Some(mut session) = pool.sessions.remove(&key) else {
            self.inner.reconnecting.lock().remove(&session_id);
            return KeepAliveOutcome::Unknown;
        };
        session.state = SessionState::Reconnecting;
        let endpoint = session.endpoint.clone();
        let source = session.source.clone();
        pool.detached.insert(session_id, session);
        self.update_counts(&pool);
        drop(pool);

        self.spawn_reconnect(session_id, endpoint, source);
        KeepAliveOutcome::ReconnectStarted
    }

    fn spawn_reconnect(
        &self,
        session_id: SessionId,
        endpoint: SourceEndpoint,
        source: Arc<dyn SourceSession>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        let cancel = self.inner.ctx.child_token();
        let period = self.inner.config.reconnect_period;

        tokio::spawn(async move {
            info!(endpoint = %endpoint.url, session_id, "Reconnecting source session");

            loop {
                if cancel.is_cancelled() || !manager.is_detached(session_id).await {
                    debug!(endpoint = %endpoint.url, session_id, "Reconnect abandoned");
                    break;
                }

                match source.reconnect().await {
                    Ok(()) => {
                        manager.commit_reconnect(session_id).await;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            endpoint = %endpoint.url,
                            error = %e,
                            retry_in_ms = period.as_millis() as u64,
                            "Reconnect failed"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(period) => {}
                        }
                    }
                }
            }

            manager.inner.reconnecting.lock().remove(&session_id);
        })
    }

    async fn is_detached(&self, session_id: SessionId) -> bool {
        self.inner.pool.lock().await.detached.contains_key(&session_id)
    }

    async fn commit_reconnect(&self, session_id: SessionId) {
        let mut pool = self.inner.pool.lock().await;
        let Some(mut session) = pool.detached.remove(&session_id) else {
            debug!(session_id, "Reconnected session was unpublished meanwhile");
            return;
        };

        session.state = SessionState::Connected;
        session.missed_keep_alives = 0;
        session.namespaces = session.source.namespace_array();
        let key = session.key();

        if !pool.sessions.contains_key(&key) {
            info!(endpoint = %session.endpoint.url, session_id, "Source session reconnected");
            pool.sessions.insert(key, session);
            self.update_counts(&pool);
            return;
        }

        warn!(
            endpoint = %session.endpoint.url,
            session_id,
            "Endpoint republished during reconnect, merging points into the new session"
        );
        let endpoint = session.endpoint.clone();
        let live: HashSet<String> = pool
            .sessions
            .get(&key)
            .map(|s| s.points().map(|p| p.node_id().to_string()).collect())
            .unwrap_or_default();
        let missing: Vec<PointSpec> = session
            .subscriptions
            .iter()
            .flat_map(|sub| sub.points.iter().map(move |p| point_spec(p, sub.publishing_interval_ms)))
            .filter(|spec| !live.contains(&spec.node_id))
            .collect();
        self.teardown(session).await;

        for spec in &missing {
            if let Err(e) = self.publish_locked(&mut pool, &endpoint, spec).await {
                warn!(endpoint = %endpoint.url, node_id = %spec.node_id, error = %e, "Point merge failed");
            }
        }
        self.update_counts(&pool);
        self.persist_locked(&pool).await;
    }
}

fn point_spec(point: &ManagedPoint, publishing_interval_ms: u32) -> PointSpec {
    PointSpec {
        node_id: point.node_id().to_string(),
        publishing_interval_ms,
        sampling_interval_ms: point.sampling_interval_ms,
        heartbeat_interval_ms: point.heartbeat_interval_ms,
        skip_first: point.skip_first,
        event_filter: point.event_filter.clone(),
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("backend", &self.inner.connector.name())
            .field("config", &self.inner.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedConnector, SimulatedServer};
    use tempfile::TempDir;
    use ualink_core::context::DEFAULT_PUBLISHING_INTERVAL_MS;
    use ualink_core::{record_queue, EventFilterClause, RecordReceiver, Variant};

    const URL: &str = "opc.tcp://plc:4840";

    struct Fixture {
        manager: ConnectionManager,
        server: Arc<SimulatedServer>,
        receiver: RecordReceiver,
        ctx: GatewayContext,
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
            manager,
            server,
            receiver,
            ctx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn drain(receiver: &mut RecordReceiver) -> usize {
        std::iter::from_fn(|| receiver.try_recv()).count()
    }

    #[tokio::test]
    async fn test_one_session_per_endpoint() {
        let f = fixture();
        f.manager
            .publish_point(&SourceEndpoint::new(URL), &PointSpec::variable("ns=2;s=Speed"))
            .await
            .unwrap();
        f.manager
            .publish_point(&SourceEndpoint::new("OPC.TCP://plc:4840/"), &PointSpec::variable("ns=2;s=Level"))
            .await
            .unwrap();

        assert_eq!(f.server.connect_count(), 1);
        assert_eq!(f.manager.session_count().await, 1);
        assert_eq!(f.server.subscription_count(), 1);
        assert_eq!(f.ctx.diagnostics().monitored_items(), 2);
    }

    #[tokio::test]
    async fn test_republish_replaces_point() {
        let f = fixture();
        let endpoint = SourceEndpoint::new(URL);
        let first = f
            .manager
            .publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed"))
            .await
            .unwrap();
        let second = f
            .manager
            .publish_point(
                &endpoint,
                &PointSpec::variable("nsu=http://example.com/plant;s=Speed").with_publishing_interval(2000),
            )
            .await
            .unwrap();

        assert!(!first.replaced);
        assert!(second.replaced);
        assert_eq!(second.node_id, "nsu=http://example.com/plant;s=Speed");
        assert_eq!(f.server.monitored_item_count(), 1);
        assert_eq!(f.server.subscription_count(), 1);

        let listed = f.manager.list_published().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].opc_nodes.len(), 1);
        assert_eq!(listed[0].opc_nodes[0].publishing_interval, 2000);
    }

    #[tokio::test]
    async fn test_failed_republish_keeps_existing_point() {
        let temp = TempDir::new().unwrap();
        let store = PointSetStore::new(temp.path().join("points.json"));
        let f = fixture_with(Some(store.clone()));
        let endpoint = SourceEndpoint::new(URL);
        f.manager
            .publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed").with_heartbeat(1000))
            .await
            .unwrap();

        f.server.set_max_subscriptions(1);
        let result = f
            .manager
            .publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed").with_publishing_interval(2000))
            .await;
        assert!(matches!(result, Err(GatewayError::Transport { .. })));

        assert_eq!(f.manager.session_count().await, 1);
        assert_eq!(f.server.closed_sessions(), 0);
        assert_eq!(f.server.subscription_count(), 1);
        assert_eq!(f.server.monitored_item_count(), 1);
        assert_eq!(f.ctx.diagnostics().monitored_items(), 1);

        let listed = f.manager.list_published().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].opc_nodes.len(), 1);
        assert_eq!(listed[0].opc_nodes[0].publishing_interval, DEFAULT_PUBLISHING_INTERVAL_MS);
        assert_eq!(listed[0].opc_nodes[0].heartbeat_interval, 1000);

        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].opc_nodes[0].publishing_interval, DEFAULT_PUBLISHING_INTERVAL_MS);
    }

    #[tokio::test]
    async fn test_intervals_share_or_split_subscriptions() {
        let f = fixture();
        let endpoint = SourceEndpoint::new(URL);
        f.manager
            .publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed").with_publishing_interval(1000))
            .await
            .unwrap();
        f.manager
            .publish_point(&endpoint, &PointSpec::variable("ns=2;s=Level").with_publishing_interval(5000))
            .await
            .unwrap();
        assert_eq!(f.server.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_unresolvable_node_leaves_no_session() {
        let f = fixture();
        let endpoint = SourceEndpoint::new(URL);

        let unknown = f.manager.publish_point(&endpoint, &PointSpec::variable("ns=2;s=Missing")).await;
        assert!(matches!(unknown, Err(GatewayError::Resolution { .. })));

        let bad_uri = f.manager.publish_point(&endpoint, &PointSpec::variable("nsu=urn:nope;i=1")).await;
        assert!(matches!(bad_uri, Err(GatewayError::Resolution { .. })));

        assert_eq!(f.manager.session_count().await, 0);
        assert_eq!(f.server.closed_sessions(), 2);
    }

    #[tokio::test]
    async fn test_connection_error() {
        let f = fixture();
        let result = f
            .manager
            .publish_point(&SourceEndpoint::new("opc.tcp://other:4840"), &PointSpec::variable("i=2253"))
            .await;
        assert!(matches!(result, Err(GatewayError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_unpublish_tears_down_when_empty() {
        let f = fixture();
        let endpoint = SourceEndpoint::new(URL);
        f.manager
            .publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed").with_heartbeat(1000))
            .await
            .unwrap();

        let outcome = f
            .manager
            .unpublish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed"))
            .await
            .unwrap();
        assert_eq!(outcome, UnpublishOutcome::Removed);
        assert_eq!(f.manager.session_count().await, 0);
        assert_eq!(f.server.subscription_count(), 0);
        assert_eq!(f.server.closed_sessions(), 1);
        assert_eq!(f.manager.inner.heartbeats.active_count(), 0);

        let again = f
            .manager
            .unpublish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed"))
            .await
            .unwrap();
        assert_eq!(again, UnpublishOutcome::NotPublished);
    }

    #[tokio::test]
    async fn test_skip_first_swallows_initial_value() {
        let mut f = fixture();
        let endpoint = SourceEndpoint::new(URL);
        f.manager
            .publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed").with_skip_first(true))
            .await
            .unwrap();
        assert_eq!(drain(&mut f.receiver), 0);

        f.server.set_value(&NodeId::string(2, "Speed"), Variant::Int32(11));
        assert_eq!(drain(&mut f.receiver), 1);
    }

    #[tokio::test]
    async fn test_event_point_defaults_to_server_object() {
        let mut f = fixture();
        let endpoint = SourceEndpoint::new(URL);
        let published = f
            .manager
            .publish_point(
                &endpoint,
                &PointSpec::event(
                    "",
                    vec![EventFilterClause {
                        of_type: "AlarmType".into(),
                    }],
                ),
            )
            .await
            .unwrap();
        assert_eq!(published.node_id, "i=2253");

        f.server.emit_event(
            &NodeId::SERVER,
            vec![ualink_core::EventField::new("EventType", Variant::from("AlarmType"))],
        );
        let record = f.receiver.try_recv().unwrap();
        assert!(record.is_event());

        let listed = f.manager.list_published().await;
        assert_eq!(listed[0].opc_events.len(), 1);
        assert!(listed[0].opc_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_unpublish_all_and_persistence() {
        let temp = TempDir::new().unwrap();
        let store = PointSetStore::new(temp.path().join("persistency.json"));
        let f = fixture_with(Some(store.clone()));
        let endpoint = SourceEndpoint::new(URL);

        f.manager.publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed")).await.unwrap();
        f.manager.publish_point(&endpoint, &PointSpec::variable("ns=2;s=Level")).await.unwrap();
        assert_eq!(store.load().await.unwrap()[0].opc_nodes.len(), 2);

        assert_eq!(f.manager.unpublish_all().await, 2);
        assert!(store.load().await.unwrap().is_empty());
        assert!(f.manager.list_published().await.is_empty());
        assert_eq!(f.ctx.diagnostics().monitored_items(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_keep_alives_start_one_reconnect() {
        let f = fixture();
        let endpoint = SourceEndpoint::new(URL);
        f.manager.publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed")).await.unwrap();

        f.server.set_healthy(false);
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.extend(f.manager.probe_sessions().await.into_iter().map(|(_, o)| o));
        }
        assert_eq!(
            outcomes,
            vec![
                KeepAliveOutcome::Missed(1),
                KeepAliveOutcome::Missed(2),
                KeepAliveOutcome::ReconnectStarted
            ]
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.manager.probe_sessions().await.is_empty());
        assert_eq!(f.server.reconnect_attempts(), 1);
        assert_eq!(f.manager.reconnecting_count(), 1);
        assert_eq!(f.manager.session_state(URL).await, Some(SessionState::Reconnecting));
        assert!(f.manager.list_published().await.is_empty());

        f.server.set_healthy(true);
        tokio::time::sleep(DEFAULT_RECONNECT_PERIOD + Duration::from_millis(10)).await;

        assert_eq!(f.server.reconnect_attempts(), 2);
        assert_eq!(f.manager.reconnecting_count(), 0);
        assert_eq!(f.manager.session_state(URL).await, Some(SessionState::Connected));
        assert_eq!(f.manager.list_published().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpublish_all_abandons_reconnect() {
        let f = fixture();
        let endpoint = SourceEndpoint::new(URL);
        f.manager.publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed")).await.unwrap();

        f.server.set_healthy(false);
        for _ in 0..3 {
            f.manager.probe_sessions().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.manager.unpublish_all().await;

        f.server.set_healthy(true);
        tokio::time::sleep(DEFAULT_RECONNECT_PERIOD * 2).await;
        assert_eq!(f.manager.reconnecting_count(), 0);
        assert!(f.manager.list_published().await.is_empty());
        assert_eq!(f.manager.session_state(URL).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_republish_during_reconnect_merges() {
        let f = fixture();
        let endpoint = SourceEndpoint::new(URL);
        f.manager.publish_point(&endpoint, &PointSpec::variable("ns=2;s=Speed")).await.unwrap();

        f.server.set_healthy(false);
        for _ in 0..3 {
            f.manager.probe_sessions().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        f.server.set_healthy(true);
        f.manager.publish_point(&endpoint, &PointSpec::variable("ns=2;s=Level")).await.unwrap();
        tokio::time::sleep(DEFAULT_RECONNECT_PERIOD + Duration::from_millis(10)).await;

        let listed = f.manager.list_published().await;
        assert_eq!(listed.len(), 1);
        let mut ids: Vec<&str> = listed[0].opc_nodes.iter().map(|n| n.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(
            ids,
            vec!["nsu=http://example.com/plant;s=Level", "nsu=http://example.com/plant;s=Speed"]
        );
        assert_eq!(f.manager.session_count().await, 1);
    }
}
