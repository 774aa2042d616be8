//! File-backed shared state store with an atomic publish protocol.
//!
//! The producer and the reconciler never talk directly; they coordinate
//! through a single JSON document. Writers serialize to a `.tmp` staging
//! path next to the canonical file and then rename it into place, so a
//! reader can never observe a half-written document. Readers that find the
//! staging artifact (or an unparseable document) retry with a short delay
//! and then give up for the cycle — a skipped cycle, never a crash.

use super::document::TrackSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Abstraction over the shared document so tests can swap in an in-memory
/// store and the reconciler never cares where the document lives.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Latest published snapshot. `Ok(None)` means the document does not
    /// exist yet or is momentarily unreadable; the caller skips the cycle.
    async fn read(&self) -> Result<Option<TrackSnapshot>>;

    /// Atomically replace the published snapshot.
    async fn publish(&self, snapshot: &TrackSnapshot) -> Result<()>;
}

pub struct FileStateStore {
    path: PathBuf,
    staging_path: PathBuf,
    max_read_retries: u32,
    retry_delay: Duration,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let staging_path = staging_path_for(&path);
        Self {
            path,
            staging_path,
            max_read_retries: 5,
            retry_delay: Duration::from_millis(100),
        }
    }

    /// Override the read retry budget (tests use tighter values).
    pub fn with_read_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_read_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    async fn try_read_once(&self) -> ReadAttempt {
        // A staging artifact means a write is in progress right now.
        if tokio::fs::try_exists(&self.staging_path)
            .await
            .unwrap_or(false)
        {
            return ReadAttempt::WriteInProgress;
        }

        let raw = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ReadAttempt::Missing,
            Err(e) => return ReadAttempt::IoError(e),
        };

        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return ReadAttempt::Missing;
        }

        match serde_json::from_slice::<TrackSnapshot>(&raw) {
            Ok(snapshot) => ReadAttempt::Ok(snapshot),
            Err(e) => ReadAttempt::Corrupt(e),
        }
    }
}

enum ReadAttempt {
    Ok(TrackSnapshot),
    Missing,
    WriteInProgress,
    Corrupt(serde_json::Error),
    IoError(std::io::Error),
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn read(&self) -> Result<Option<TrackSnapshot>> {
        let mut last_corrupt: Option<serde_json::Error> = None;

        for attempt in 0..self.max_read_retries {
            match self.try_read_once().await {
                ReadAttempt::Ok(snapshot) => return Ok(Some(snapshot)),
                ReadAttempt::Missing => return Ok(None),
                ReadAttempt::WriteInProgress => {
                    debug!(
                        "Write in progress on {:?} (attempt {}/{})",
                        self.path,
                        attempt + 1,
                        self.max_read_retries
                    );
                }
                ReadAttempt::Corrupt(e) => {
                    // May be a torn write from a non-atomic producer; retry
                    // before concluding the document is actually corrupt.
                    debug!(
                        "Unparseable document at {:?} (attempt {}/{}): {}",
                        self.path,
                        attempt + 1,
                        self.max_read_retries,
                        e
                    );
                    last_corrupt = Some(e);
                }
                ReadAttempt::IoError(e) => {
                    warn!("Failed to read {:?}: {}", self.path, e);
                }
            }
            tokio::time::sleep(self.retry_delay).await;
        }

        if let Some(e) = last_corrupt {
            // Corrupt after all retries: treat as first-ever cycle.
            warn!(
                "Document at {:?} is corrupt, treating as no prior state: {}",
                self.path, e
            );
        } else {
            warn!(
                "Gave up reading {:?} after {} attempts, skipping cycle",
                self.path, self.max_read_retries
            );
        }
        Ok(None)
    }

    async fn publish(&self, snapshot: &TrackSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create state directory {:?}", parent))?;
        }

        let body = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;

        tokio::fs::write(&self.staging_path, &body)
            .await
            .with_context(|| format!("Failed to write staging file {:?}", self.staging_path))?;

        tokio::fs::rename(&self.staging_path, &self.path)
            .await
            .with_context(|| format!("Failed to publish {:?}", self.path))?;

        debug!(
            "Published snapshot seq {} to {:?}",
            snapshot.sequence, self.path
        );
        Ok(())
    }
}

fn staging_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// In-memory store used by tests and by single-process deployments where
/// both loops share a runtime.
pub struct MemoryStateStore {
    inner: tokio::sync::RwLock<Option<TrackSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::RwLock::new(None),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn read(&self) -> Result<Option<TrackSnapshot>> {
        Ok(self.inner.read().await.clone())
    }

    async fn publish(&self, snapshot: &TrackSnapshot) -> Result<()> {
        *self.inner.write().await = Some(snapshot.clone());
        Ok(())
    }
}
