//! Shared fixtures for end-to-end reconciliation tests.
//!
//! The pipeline under test runs against an in-memory state store and fake
//! providers that count their calls, so every external effect is observable
//! and no test touches the network.

use async_trait::async_trait;
use deckwatch::fetch_cache::{FetchCacheSettings, MediaFetchCache};
use deckwatch::history::ArtistHistory;
use deckwatch::provider::{MediaProvider, OfflineMediaBank, ProviderError, TagProvider};
use deckwatch::rate_limiter::{RateLimiterSettings, SlidingWindowLimiter};
use deckwatch::reconciler::{
    EnrichmentOrchestrator, EnrichmentSettings, Reconciler, ReconcilerSettings,
};
use deckwatch::state_store::{DeckState, MediaItem, MemoryStateStore, StateStore, TrackSnapshot};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct CountingMediaProvider {
    calls: AtomicUsize,
    items: Vec<MediaItem>,
}

impl CountingMediaProvider {
    pub fn new(prefix: &str, count: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            items: media_items(prefix, count),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProvider for CountingMediaProvider {
    async fn search(
        &self,
        _query: &str,
        pool_size: usize,
    ) -> Result<Vec<MediaItem>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.iter().take(pool_size).cloned().collect())
    }
}

pub struct StaticTagProvider {
    calls: AtomicUsize,
    tags: Vec<String>,
}

impl StaticTagProvider {
    pub fn new(tags: &[&str]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TagProvider for StaticTagProvider {
    async fn track_tags(&self, _artist: &str, _title: &str) -> Result<Vec<String>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tags.clone())
    }
}

pub fn media_items(prefix: &str, count: usize) -> Vec<MediaItem> {
    (0..count)
        .map(|i| MediaItem {
            id: format!("{prefix}{i}"),
            url: format!("https://media.test/{prefix}{i}"),
            title: format!("{prefix} clip {i}"),
            mime: Some("video/mp4".to_string()),
            source: Some(prefix.to_string()),
            tags: vec!["energetic".to_string()],
        })
        .collect()
}

pub fn deck(title: &str, artist: &str, playing: bool) -> DeckState {
    DeckState {
        title: Some(title.to_string()),
        artist: Some(artist.to_string()),
        key: Some("8A".to_string()),
        bpm: Some(128.0),
        is_playing: playing,
        ..Default::default()
    }
}

pub fn snapshot(deck1: DeckState, deck2: DeckState) -> TrackSnapshot {
    TrackSnapshot {
        deck1,
        deck2,
        ..Default::default()
    }
}

pub struct PipelineOptions {
    pub max_requests: usize,
    pub transition_duration_secs: f64,
    pub media_count: usize,
    pub pool_size: usize,
    pub with_tags: bool,
    pub with_video: Option<Arc<CountingMediaProvider>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_requests: 100,
            transition_duration_secs: 2.0,
            media_count: 2,
            pool_size: 6,
            with_tags: false,
            with_video: None,
        }
    }
}

pub struct TestPipeline {
    pub store: Arc<MemoryStateStore>,
    pub reconciler: Reconciler,
    pub provider: Arc<CountingMediaProvider>,
    pub tags: Arc<StaticTagProvider>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub cache: Arc<MediaFetchCache>,
    pub history: Arc<ArtistHistory>,
}

impl TestPipeline {
    pub fn spawn(options: PipelineOptions) -> Self {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(CountingMediaProvider::new("live", 6));
        let tags = Arc::new(StaticTagProvider::new(&["electro", "house"]));
        let limiter = Arc::new(SlidingWindowLimiter::new(RateLimiterSettings {
            window: Duration::from_secs(60),
            max_requests: options.max_requests,
            enabled: true,
        }));
        let history = Arc::new(ArtistHistory::new(30));
        let cache = Arc::new(MediaFetchCache::new(
            FetchCacheSettings::default(),
            CancellationToken::new(),
        ));

        let orchestrator = EnrichmentOrchestrator::new(
            Some(Arc::clone(&provider) as Arc<dyn MediaProvider>),
            options
                .with_tags
                .then(|| Arc::clone(&tags) as Arc<dyn TagProvider>),
            options
                .with_video
                .map(|v| v as Arc<dyn MediaProvider>),
            Arc::new(OfflineMediaBank::from_items(media_items("bank", 8))),
            Arc::clone(&limiter),
            Arc::clone(&history),
            Arc::clone(&cache),
            EnrichmentSettings {
                media_count: options.media_count,
                pool_size: options.pool_size,
                transition_duration_secs: options.transition_duration_secs,
                video_pool_size: 2,
            },
        );

        let reconciler = Reconciler::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            orchestrator,
            Arc::clone(&cache),
            ReconcilerSettings {
                poll_interval: Duration::from_millis(10),
                debounce: Duration::ZERO,
                sweep_interval: Duration::from_secs(60),
                watch_path: None,
            },
        );

        Self {
            store,
            reconciler,
            provider,
            tags,
            limiter,
            cache,
            history,
        }
    }

    /// Publish a producer-style document (basics only, enrichment untouched)
    /// and run one reconciliation cycle.
    pub async fn observe(&self, snapshot: &TrackSnapshot) -> bool {
        self.store.publish(snapshot).await.unwrap();
        self.reconciler.run_cycle().await.unwrap()
    }

    pub async fn published(&self) -> TrackSnapshot {
        self.store.read().await.unwrap().expect("document published")
    }
}
