//! Watermark store
//!
//! Holds the sync state in memory and persists it to a JSON file with
//! atomic writes (temp file + rename). The store is cheap to clone; clones
//! share the same state and file.

use super::types::{merge_cutoff, merge_job, PendingJob, SyncState, Watermark};
use crate::error::{Error, Result};
use crate::types::{PartitionKey, Timestamp};
use chrono::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Durable watermark store
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    /// Path to the state file; empty for in-memory stores
    path: PathBuf,
    /// Current state (cached)
    state: Arc<RwLock<SyncState>>,
    /// Serializes writers of the state file
    save_lock: Arc<Mutex<()>>,
    /// Whether to save on every update
    auto_save: bool,
}

impl WatermarkStore {
    /// Create a store backed by `path`, starting empty
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_state(path.as_ref().to_path_buf(), SyncState::new(), true)
    }

    /// Create a store backed by `path` that only writes on [`save`](Self::save)
    pub fn without_auto_save(path: impl AsRef<Path>) -> Self {
        Self::with_state(path.as_ref().to_path_buf(), SyncState::new(), false)
    }

    /// Create an in-memory store (no file persistence)
    pub fn in_memory() -> Self {
        Self::with_state(PathBuf::new(), SyncState::new(), false)
    }

    /// Create a store from a file, loading existing state if present
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
            parse_state(&contents)?
        } else {
            SyncState::new()
        };

        Ok(Self::with_state(path, state, true))
    }

    /// Create an in-memory store from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::with_state(PathBuf::new(), parse_state(json)?, false))
    }

    fn with_state(path: PathBuf, state: SyncState, auto_save: bool) -> Self {
        Self {
            path,
            state: Arc::new(RwLock::new(state)),
            save_lock: Arc::new(Mutex::new(())),
            auto_save,
        }
    }

    /// Reload state from the backing file
    ///
    /// A missing file leaves the current state untouched.
    pub async fn load(&self) -> Result<()> {
        if self.is_in_memory() || !self.path.exists() {
            return Ok(());
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
        let loaded = parse_state(&contents)?;

        *self.state.write().await = loaded;
        Ok(())
    }

    /// Save current state to the backing file
    pub async fn save(&self) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }
        self.save_to_file(&self.path).await
    }

    /// Save state to a specific file path
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let contents = self.to_json_pretty().await?;

        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::state(format!("Failed to write state file: {e}")))?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| Error::state(format!("Failed to rename state file: {e}")))?;

        debug!(path = %path.display(), "state saved");
        Ok(())
    }

    /// Save current state (alias used at checkpoints)
    pub async fn checkpoint(&self) -> Result<()> {
        self.save().await
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> SyncState {
        self.state.read().await.clone()
    }

    /// Export state as JSON string
    pub async fn to_json(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    /// Export state as pretty-printed JSON string
    pub async fn to_json_pretty(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string_pretty(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    /// Get the watermark of one partition
    pub async fn get(&self, stream: &str, partition: &PartitionKey) -> Option<Watermark> {
        self.state.read().await.get(stream, partition).cloned()
    }

    /// Replace the watermark of one partition
    pub async fn set(&self, stream: &str, partition: &PartitionKey, watermark: Watermark) -> Result<()> {
        self.state.write().await.set(stream, partition, watermark);
        self.persist().await
    }

    /// Advance the cutoff of one partition, never moving it backwards
    ///
    /// Returns the resulting watermark.
    pub async fn merge_cutoff(
        &self,
        stream: &str,
        partition: &PartitionKey,
        observed: Timestamp,
    ) -> Result<Watermark> {
        let merged = {
            let mut state = self.state.write().await;
            let merged = merge_cutoff(state.get(stream, partition), observed);
            state.set(stream, partition, merged.clone());
            merged
        };
        self.persist().await?;
        Ok(merged)
    }

    /// Record a job descriptor for one partition
    ///
    /// Returns the resulting watermark, which is the existing job when a
    /// different job still holds the active slot.
    pub async fn merge_job(
        &self,
        stream: &str,
        partition: &PartitionKey,
        job: PendingJob,
        now: Timestamp,
        stale_after: Duration,
    ) -> Result<Watermark> {
        let merged = {
            let mut state = self.state.write().await;
            let merged = merge_job(state.get(stream, partition), job, now, stale_after);
            state.set(stream, partition, merged.clone());
            merged
        };
        self.persist().await?;
        Ok(merged)
    }

    /// Drop the watermark of one partition
    pub async fn remove(&self, stream: &str, partition: &PartitionKey) -> Result<Option<Watermark>> {
        let removed = self.state.write().await.remove(stream, partition);
        self.persist().await?;
        Ok(removed)
    }

    /// Clear state for a specific stream
    pub async fn clear_stream(&self, stream: &str) -> Result<()> {
        self.state.write().await.streams.remove(stream);
        self.persist().await
    }

    /// Clear all state
    pub async fn clear(&self) -> Result<()> {
        *self.state.write().await = SyncState::new();
        self.persist().await
    }

    /// Get the state file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    async fn persist(&self) -> Result<()> {
        if self.auto_save {
            self.save().await?;
        }
        Ok(())
    }
}

fn parse_state(contents: &str) -> Result<SyncState> {
    if contents.trim().is_empty() {
        return Ok(SyncState::new());
    }
    serde_json::from_str(contents).map_err(|e| Error::state(format!("Failed to parse state: {e}")))
}
