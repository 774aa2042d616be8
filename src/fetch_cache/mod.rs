//! Asynchronous media fetch cache with in-flight de-duplication.
//!
//! Slow external fetches (music-video search/download) never run on the
//! reconciliation cycle. The orchestrator asks the cache to start a fetch if
//! one is warranted; the cache guarantees at most one worker per track key,
//! applies cooldowns after empty or failed attempts, and garbage-collects
//! entries for tracks that have gone inactive.

use crate::state_store::MediaItem;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Terminal and in-flight states of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A worker is currently fetching for this key.
    Pending,
    /// Fetch completed with a non-empty payload.
    Ready,
    /// Fetch completed but produced nothing usable.
    Empty,
    /// Fetch failed (network/provider/cancellation).
    Error,
}

#[derive(Debug, Clone)]
pub struct MediaCacheEntry {
    pub status: CacheStatus,
    pub payload: Vec<MediaItem>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Last time the reconciler showed interest in this key; drives retention.
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FetchCacheSettings {
    /// Wait before retrying a key whose last fetch came back empty.
    pub empty_cooldown: Duration,
    /// Wait before retrying a key whose last fetch errored. Shorter than the
    /// empty cooldown: transient failures deserve a faster second chance.
    pub error_cooldown: Duration,
    /// Entries inactive for longer than this are swept.
    pub retention: Duration,
    /// Pending entries older than this are presumed orphaned (worker died
    /// without writing a terminal status) and marked as errors.
    pub stale_pending: Duration,
}

impl Default for FetchCacheSettings {
    fn default() -> Self {
        Self {
            empty_cooldown: Duration::from_secs(300),
            error_cooldown: Duration::from_secs(60),
            retention: Duration::from_secs(60),
            stale_pending: Duration::from_secs(600),
        }
    }
}

pub struct MediaFetchCache {
    entries: Arc<Mutex<HashMap<String, MediaCacheEntry>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    settings: FetchCacheSettings,
}

impl MediaFetchCache {
    pub fn new(settings: FetchCacheSettings, cancel: CancellationToken) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            cancel,
            settings,
        }
    }

    /// Start a background fetch for `track_key` unless one is unnecessary.
    ///
    /// No-ops when an entry is already ready or in flight, and while an
    /// empty/error cooldown is still running. Returns whether a worker was
    /// actually dispatched. The worker always records a terminal status,
    /// including on cancellation.
    pub async fn start_if_needed<F>(&self, track_key: &str, fetch: F) -> bool
    where
        F: Future<Output = Result<Vec<MediaItem>>> + Send + 'static,
    {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(track_key) {
            entry.last_active = now;
            match entry.status {
                CacheStatus::Pending | CacheStatus::Ready => return false,
                CacheStatus::Empty => {
                    if !cooldown_elapsed(entry, now, self.settings.empty_cooldown) {
                        return false;
                    }
                }
                CacheStatus::Error => {
                    if !cooldown_elapsed(entry, now, self.settings.error_cooldown) {
                        return false;
                    }
                }
            }
        }

        entries.insert(
            track_key.to_string(),
            MediaCacheEntry {
                status: CacheStatus::Pending,
                payload: Vec::new(),
                started_at: now,
                completed_at: None,
                error: None,
                last_active: now,
            },
        );
        drop(entries);

        let entries = Arc::clone(&self.entries);
        let cancel = self.cancel.clone();
        let key = track_key.to_string();
        debug!("Dispatching media fetch worker for '{}'", key);

        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                result = fetch => Some(result),
                _ = cancel.cancelled() => None,
            };

            let mut entries = entries.lock().await;
            let Some(entry) = entries.get_mut(&key) else {
                // Swept while in flight; nothing left to record.
                return;
            };
            entry.completed_at = Some(Utc::now());
            match outcome {
                Some(Ok(items)) if items.is_empty() => {
                    debug!("Media fetch for '{}' returned nothing", key);
                    entry.status = CacheStatus::Empty;
                }
                Some(Ok(items)) => {
                    info!("Media fetch for '{}' ready ({} items)", key, items.len());
                    entry.payload = items;
                    entry.status = CacheStatus::Ready;
                }
                Some(Err(e)) => {
                    warn!("Media fetch for '{}' failed: {:#}", key, e);
                    entry.error = Some(format!("{e:#}"));
                    entry.status = CacheStatus::Error;
                }
                None => {
                    entry.error = Some("cancelled during shutdown".to_string());
                    entry.status = CacheStatus::Error;
                }
            }
        });

        true
    }

    /// Current entry for a key, bumping its activity timestamp.
    pub async fn get(&self, track_key: &str) -> Option<MediaCacheEntry> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(track_key)?;
        entry.last_active = Utc::now();
        Some(entry.clone())
    }

    /// Drop entries whose tracks have been inactive beyond the retention
    /// window and fail pending entries whose worker evidently died. Returns
    /// the number of removed entries.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.settings.retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let stale_pending = chrono::Duration::from_std(self.settings.stale_pending)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));

        let mut entries = self.entries.lock().await;
        for (key, entry) in entries.iter_mut() {
            if entry.status == CacheStatus::Pending && now - entry.started_at > stale_pending {
                warn!("Pending media fetch for '{}' never completed", key);
                entry.status = CacheStatus::Error;
                entry.error = Some("worker never completed".to_string());
                entry.completed_at = Some(now);
            }
        }

        let before = entries.len();
        entries.retain(|_, entry| {
            entry.status == CacheStatus::Pending || now - entry.last_active <= retention
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} inactive media cache entries", removed);
        }
        removed
    }

    /// Stop accepting work and wait for outstanding workers to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn cooldown_elapsed(entry: &MediaCacheEntry, now: DateTime<Utc>, cooldown: Duration) -> bool {
    let reference = entry.completed_at.unwrap_or(entry.started_at);
    let cooldown =
        chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::seconds(60));
    now - reference >= cooldown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn item(id: &str) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            url: format!("https://media.example/{id}"),
            title: id.to_string(),
            mime: None,
            source: None,
            tags: vec![],
        }
    }

    fn cache(settings: FetchCacheSettings) -> MediaFetchCache {
        MediaFetchCache::new(settings, CancellationToken::new())
    }

    fn fast_settings() -> FetchCacheSettings {
        FetchCacheSettings {
            empty_cooldown: Duration::from_millis(50),
            error_cooldown: Duration::from_millis(100),
            retention: Duration::from_millis(50),
            stale_pending: Duration::from_secs(600),
        }
    }

    async fn wait_for_terminal(cache: &MediaFetchCache, key: &str) -> MediaCacheEntry {
        for _ in 0..100 {
            if let Some(entry) = cache.get(key).await {
                if entry.status != CacheStatus::Pending {
                    return entry;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("fetch for {key} never completed");
    }

    #[tokio::test]
    async fn test_in_flight_guard_dispatches_once() {
        let cache = cache(fast_settings());
        let calls = Arc::new(AtomicUsize::new(0));

        let make_fetch = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(vec![item("v1")])
        };

        let first = cache
            .start_if_needed("x|a", make_fetch(Arc::clone(&calls)))
            .await;
        let second = cache
            .start_if_needed("x|a", make_fetch(Arc::clone(&calls)))
            .await;
        assert!(first);
        assert!(!second);

        let entry = wait_for_terminal(&cache, "x|a").await;
        assert_eq!(entry.status, CacheStatus::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_entry_is_a_noop() {
        let cache = cache(fast_settings());
        cache
            .start_if_needed("x|a", async { Ok(vec![item("v1")]) })
            .await;
        wait_for_terminal(&cache, "x|a").await;

        let dispatched = cache
            .start_if_needed("x|a", async { Ok(vec![item("v2")]) })
            .await;
        assert!(!dispatched);
        let entry = cache.get("x|a").await.unwrap();
        assert_eq!(entry.payload[0].id, "v1");
    }

    #[tokio::test]
    async fn test_error_retries_after_cooldown() {
        let cache = cache(fast_settings());
        cache
            .start_if_needed("x|a", async { Err(anyhow::anyhow!("provider down")) })
            .await;
        let entry = wait_for_terminal(&cache, "x|a").await;
        assert_eq!(entry.status, CacheStatus::Error);
        assert!(entry.error.unwrap().contains("provider down"));

        // Inside the cooldown: still a no-op.
        assert!(!cache.start_if_needed("x|a", async { Ok(vec![]) }).await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(
            cache
                .start_if_needed("x|a", async { Ok(vec![item("v1")]) })
                .await
        );
        let entry = wait_for_terminal(&cache, "x|a").await;
        assert_eq!(entry.status, CacheStatus::Ready);
    }

    #[tokio::test]
    async fn test_empty_result_marks_empty() {
        let cache = cache(fast_settings());
        cache.start_if_needed("x|a", async { Ok(vec![]) }).await;
        let entry = wait_for_terminal(&cache, "x|a").await;
        assert_eq!(entry.status, CacheStatus::Empty);
    }

    #[tokio::test]
    async fn test_sweep_removes_inactive_entries() {
        let cache = cache(fast_settings());
        cache
            .start_if_needed("x|a", async { Ok(vec![item("v1")]) })
            .await;
        wait_for_terminal(&cache, "x|a").await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.sweep().await, 1);
        assert!(cache.get("x|a").await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_fetch() {
        let cache = cache(fast_settings());
        cache
            .start_if_needed("x|a", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(vec![])
            })
            .await;

        cache.shutdown().await;
        let entry = cache.get("x|a").await.unwrap();
        assert_eq!(entry.status, CacheStatus::Error);
    }
}
