//! Consumer loop driving the reconciliation pipeline.
//!
//! The primary trigger is a filesystem notification on the shared document;
//! polling stays on as the keep-alive for platforms and mounts where
//! notifications are unreliable. Both triggers funnel into the same cycle,
//! so the change detector's debounce applies to either.

use crate::fetch_cache::MediaFetchCache;
use crate::state_store::{DeckId, StateStore, TrackSnapshot};
use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::change_detector::ChangeDetector;
use super::merge::merge_snapshot;
use super::orchestrator::EnrichmentOrchestrator;

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// How often the shared document is re-read.
    pub poll_interval: Duration,
    /// Minimum spacing between reconciliation cycles; a play-state flip on
    /// the active deck cuts through it.
    pub debounce: Duration,
    /// How often finished fetch-cache entries are swept out.
    pub sweep_interval: Duration,
    /// Document path to watch for change notifications. `None` means
    /// polling only (in-memory stores, tests).
    pub watch_path: Option<PathBuf>,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            debounce: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(60),
            watch_path: None,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn StateStore>,
    orchestrator: EnrichmentOrchestrator,
    cache: Arc<MediaFetchCache>,
    detector: Mutex<ChangeDetector>,
    last_published: Mutex<Option<TrackSnapshot>>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn StateStore>,
        orchestrator: EnrichmentOrchestrator,
        cache: Arc<MediaFetchCache>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            orchestrator,
            cache,
            detector: Mutex::new(ChangeDetector::new(settings.debounce)),
            last_published: Mutex::new(None),
            settings,
        }
    }

    /// Run until cancelled, then drain background fetch workers.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Reconciler running, polling every {:?}",
            self.settings.poll_interval
        );

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        // Both intervals fire immediately on the first tick; skip the sweep
        // one so it does not run before anything has been fetched.
        sweep.tick().await;

        // Capacity one: a burst of filesystem events coalesces into a single
        // wakeup, which is all a cycle needs.
        let (change_tx, mut change_rx) = mpsc::channel(1);
        let _watcher = self.start_watcher(change_tx);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(()) = change_rx.recv() => {
                    debug!("Document change notification");
                    if let Err(e) = self.run_cycle().await {
                        error!("Reconciliation cycle failed: {:#}", e);
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Reconciliation cycle failed: {:#}", e);
                    }
                }
                _ = sweep.tick() => {
                    let removed = self.cache.sweep().await;
                    if removed > 0 {
                        debug!("Swept {} finished fetch cache entries", removed);
                    }
                }
            }
        }

        self.cache.shutdown().await;
        info!("Reconciler stopped");
    }

    /// Start a filesystem watcher on the shared document, feeding `tx`.
    /// Returns `None` (polling only) when no path is configured or the
    /// platform watcher cannot be set up.
    fn start_watcher(&self, tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
        let path = self.settings.watch_path.clone()?;
        // The producer replaces the document by rename, which ends the watch
        // on the file itself; watch the parent directory and filter.
        let dir = path.parent()?.to_path_buf();

        let mut watcher = match notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if event.paths.iter().any(|p| p == &path) {
                        // A full channel already holds a pending wakeup.
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => warn!("Document watch error: {}", e),
            },
        ) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!("Document watcher unavailable, polling only: {}", e);
                return None;
            }
        };

        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            warn!("Failed to watch {:?}, polling only: {}", dir, e);
            return None;
        }
        info!("Watching {:?} for document changes", dir);
        Some(watcher)
    }

    /// Run one poll-reconcile-publish cycle. Returns whether a new document
    /// was published. Exposed so tests can drive cycles without the timer.
    pub async fn run_cycle(&self) -> Result<bool> {
        let Some(observed) = self.store.read().await? else {
            return Ok(false);
        };

        let stale_hint = self
            .orchestrator
            .is_deck_stale(observed.deck(observed.active_deck));

        // An open transition window expires on wall-clock time, not on a
        // basics change, so it has to force cycles until it is cleared.
        let transition_open = [&observed.deck1, &observed.deck2]
            .iter()
            .any(|d| d.transition.as_ref().is_some_and(|t| t.in_progress));

        if !self
            .detector
            .lock()
            .await
            .should_process(&observed, stale_hint || transition_open, Instant::now())
        {
            return Ok(false);
        }

        let previous = self.last_published.lock().await.clone();
        let now = chrono::Utc::now();

        let deck1 = self
            .orchestrator
            .reconcile_deck(
                DeckId::Deck1,
                &observed.deck1,
                previous.as_ref().map(|p| &p.deck1),
                now,
            )
            .await;
        let deck2 = self
            .orchestrator
            .reconcile_deck(
                DeckId::Deck2,
                &observed.deck2,
                previous.as_ref().map(|p| &p.deck2),
                now,
            )
            .await;

        let merged = merge_snapshot(&observed, deck1, deck2, previous.as_ref(), now);

        // Nothing actually changed: republishing would only churn the
        // sequence number and wake the producer for no reason.
        let unchanged = merged.deck1 == observed.deck1
            && merged.deck2 == observed.deck2
            && merged.active_deck == observed.active_deck;
        if unchanged {
            return Ok(false);
        }

        self.store.publish(&merged).await?;
        debug!(
            "Published seq {} (active {})",
            merged.sequence, merged.active_deck
        );
        *self.last_published.lock().await = Some(merged);
        Ok(true)
    }
}
