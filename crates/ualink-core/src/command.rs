// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Remote command contract.
//!
//! The broker side routes inbound messages to a [`CommandKind`] by topic
//! suffix and hands the payload to a [`CommandHandler`]. The handler knows
//! nothing about topics, correlation ids or staleness.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayResult};

// =============================================================================
// CommandKind
// =============================================================================

/// Commands accepted on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Publish variables and events on one endpoint.
    PublishNodes,
    /// Unpublish variables and events on one endpoint.
    UnpublishNodes,
    /// Unpublish everything.
    UnpublishAllNodes,
    /// List the published point set.
    GetPublishedNodes,
    /// Return the diagnostic counters.
    GetInfo,
}

impl CommandKind {
    /// All commands.
    pub const ALL: [CommandKind; 5] = [
        Self::PublishNodes,
        Self::UnpublishNodes,
        Self::UnpublishAllNodes,
        Self::GetPublishedNodes,
        Self::GetInfo,
    ];

    /// Returns the topic suffix of this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublishNodes => "PublishNodes",
            Self::UnpublishNodes => "UnpublishNodes",
            Self::UnpublishAllNodes => "UnpublishAllNodes",
            Self::GetPublishedNodes => "GetPublishedNodes",
            Self::GetInfo => "GetInfo",
        }
    }

    /// Routes a topic against the command topic filter.
    ///
    /// `command_topic` may end in a `#` wildcard; the remainder of `topic`
    /// after the filter prefix must start with a command name.
    pub fn from_topic(command_topic: &str, topic: &str) -> Option<Self> {
        let prefix = command_topic.trim_end_matches('#');
        let suffix = topic.strip_prefix(prefix)?;
        Self::ALL
            .into_iter()
            .find(|kind| suffix.starts_with(kind.as_str()))
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GatewayError::validation("command", format!("unknown command '{}'", s)))
    }
}

// =============================================================================
// CommandOutcome & Handler
// =============================================================================

/// Result of a handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Whether the command fully succeeded.
    pub success: bool,
    /// Human readable status or serialized result.
    pub status: String,
}

impl CommandOutcome {
    /// Creates a successful outcome.
    pub fn success(status: impl Into<String>) -> Self {
        Self {
            success: true,
            status: status.into(),
        }
    }

    /// Creates a failed outcome.
    pub fn failure(status: impl Into<String>) -> Self {
        Self {
            success: false,
            status: status.into(),
        }
    }
}

/// Executes decoded commands.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Executes `kind` with the raw command payload.
    ///
    /// An `Err` is reported to the caller as a failed response carrying the
    /// error's user message.
    async fn handle(&self, kind: CommandKind, payload: &[u8]) -> GatewayResult<CommandOutcome>;
}

// =============================================================================
// Tests
// =============================================================================
