// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Spill directory for frames the broker did not accept.
//!
//! Each frame is written verbatim to its own file. File names start with a
//! zero-padded timestamp and a per-store sequence, so sorting names yields
//! the write order and the oldest frame is always the smallest name.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::debug;

use ualink_core::{GatewayError, GatewayResult};

/// Extension of spill files.
pub const SPILL_EXTENSION: &str = "spill";

/// A directory of spilled frames.
#[derive(Debug)]
pub struct SpillStore {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SpillStore {
    /// Opens the spill directory, creating it if missing.
    pub async fn open(dir: impl Into<PathBuf>) -> GatewayResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GatewayError::persistence(&dir, e))?;
        Ok(Self {
            dir,
            sequence: AtomicU64::new(0),
        })
    }

    /// Returns the directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a frame under a fresh random name.
    pub async fn store(&self, frame: &[u8]) -> GatewayResult<PathBuf> {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{:020}-{:010}-{:016x}.{}",
            nanos,
            sequence,
            rand::random::<u64>(),
            SPILL_EXTENSION
        );
        let path = self.dir.join(name);

        tokio::fs::write(&path, frame)
            .await
            .map_err(|e| GatewayError::persistence(&path, e))?;
        debug!(path = %path.display(), bytes = frame.len(), "Frame spilled");
        Ok(path)
    }

    /// Returns the spilled frames, oldest first.
    pub async fn list(&self) -> GatewayResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| GatewayError::persistence(&self.dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GatewayError::persistence(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(SPILL_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Returns the oldest spilled frame, if any.
    pub async fn oldest(&self) -> GatewayResult<Option<PathBuf>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Returns the number of spilled frames.
    pub async fn pending(&self) -> GatewayResult<usize> {
        Ok(self.list().await?.len())
    }

    /// Reads a spilled frame.
    pub async fn read(&self, path: &Path) -> GatewayResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| GatewayError::persistence(path, e))
    }

    /// Deletes a spilled frame.
    pub async fn remove(&self, path: &Path) -> GatewayResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| GatewayError::persistence(path, e))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("store");
        let store = SpillStore::open(&dir).await.unwrap();

        assert!(dir.is_dir());
        assert_eq!(store.pending().await.unwrap(), 0);
        assert!(store.oldest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oldest_first() {
        let temp = TempDir::new().unwrap();
        let store = SpillStore::open(temp.path()).await.unwrap();

        store.store(b"first").await.unwrap();
        store.store(b"second").await.unwrap();
        store.store(b"third").await.unwrap();

        let oldest = store.oldest().await.unwrap().unwrap();
        assert_eq!(store.read(&oldest).await.unwrap(), b"first");

        store.remove(&oldest).await.unwrap();
        let next = store.oldest().await.unwrap().unwrap();
        assert_eq!(store.read(&next).await.unwrap(), b"second");
        assert_eq!(store.pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_foreign_files_ignored() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        let store = SpillStore::open(temp.path()).await.unwrap();

        assert_eq!(store.pending().await.unwrap(), 0);
    }
}
