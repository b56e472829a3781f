// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Write-through persistence of the published point set.
//!
//! The file holds the same JSON array `GetPublishedNodes` returns, so it can
//! be edited by hand and replayed through `PublishNodes` on startup.

use std::path::{Path, PathBuf};

use tracing::debug;

use ualink_core::{GatewayError, GatewayResult, PublishNodesRequest};

/// JSON file holding the published point set.
#[derive(Debug, Clone)]
pub struct PointSetStore {
    path: PathBuf,
}

impl PointSetStore {
    /// Creates a store for `path`. Nothing is touched until the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file with `requests`.
    ///
    /// The content is written to a sibling temp file first and renamed
    /// over the target.
    pub async fn save(&self, requests: &[PublishNodesRequest]) -> GatewayResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::persistence(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(requests)?;
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, &json)
            .await
            .map_err(|e| GatewayError::persistence(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| GatewayError::persistence(&self.path, e))?;

        debug!(path = %self.path.display(), endpoints = requests.len(), "Published points persisted");
        Ok(())
    }

    /// Loads the file. A missing file is an empty set.
    pub async fn load(&self) -> GatewayResult<Vec<PublishNodesRequest>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(GatewayError::persistence(&self.path, e)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
