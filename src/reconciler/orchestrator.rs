//! Per-deck enrichment orchestration.
//!
//! Each reconciliation cycle the orchestrator decides, per deck, whether the
//! published enrichment still matches the live track, and (re)computes it
//! when it does not. External calls are gated by the rate limiter and fall
//! back to the offline bank; slow video lookups are handed to the fetch
//! cache instead of blocking the cycle. Calling it twice on an unchanged,
//! fresh snapshot performs zero external calls.

use crate::fetch_cache::{CacheStatus, MediaFetchCache};
use crate::history::ArtistHistory;
use crate::keywords::{derive_query, DerivedQuery};
use crate::provider::{MediaProvider, OfflineMediaBank, TagProvider};
use crate::rate_limiter::SlidingWindowLimiter;
use crate::state_store::{DeckId, DeckState, EnrichedPayload, FetchStatus, TrackIdentity};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::transition::{self, DeckPhase};

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    /// How many media items end up on the deck.
    pub media_count: usize,
    /// Pool fetched per provider call; larger than `media_count` so one call
    /// serves several cycles' worth of selection.
    pub pool_size: usize,
    /// Seconds a transition window stays open after a track change.
    pub transition_duration_secs: f64,
    /// How many videos the async fetch asks the video service for.
    pub video_pool_size: usize,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            media_count: 5,
            pool_size: 25,
            transition_duration_secs: 2.0,
            video_pool_size: 3,
        }
    }
}

pub struct EnrichmentOrchestrator {
    media_provider: Option<Arc<dyn MediaProvider>>,
    tag_provider: Option<Arc<dyn TagProvider>>,
    video_provider: Option<Arc<dyn MediaProvider>>,
    bank: Arc<OfflineMediaBank>,
    limiter: Arc<SlidingWindowLimiter>,
    history: Arc<ArtistHistory>,
    cache: Arc<MediaFetchCache>,
    settings: EnrichmentSettings,
}

impl EnrichmentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        media_provider: Option<Arc<dyn MediaProvider>>,
        tag_provider: Option<Arc<dyn TagProvider>>,
        video_provider: Option<Arc<dyn MediaProvider>>,
        bank: Arc<OfflineMediaBank>,
        limiter: Arc<SlidingWindowLimiter>,
        history: Arc<ArtistHistory>,
        cache: Arc<MediaFetchCache>,
        settings: EnrichmentSettings,
    ) -> Self {
        Self {
            media_provider,
            tag_provider,
            video_provider,
            bank,
            limiter,
            history,
            cache,
            settings,
        }
    }

    /// Query parts the current policy derives for a deck; compared against
    /// the stored payload by the staleness check.
    pub fn expected_parts(deck: &DeckState) -> Vec<String> {
        match (&deck.title, &deck.artist) {
            (Some(title), Some(artist)) => {
                derive_query(title, artist, deck.key.as_deref(), &[]).parts
            }
            _ => Vec::new(),
        }
    }

    /// Staleness report for the runner's force-trigger; only the active
    /// deck is consulted.
    pub fn is_deck_stale(&self, deck: &DeckState) -> bool {
        deck.is_playing && transition::is_stale(deck, &Self::expected_parts(deck))
    }

    /// Reconcile one deck against its previously processed state.
    ///
    /// `observed` is the deck slice of the freshly read document (enrichment
    /// round-tripped by the producer); `previous` is the deck slice of the
    /// last document this process published, used to detect identity
    /// changes.
    pub async fn reconcile_deck(
        &self,
        deck_id: DeckId,
        observed: &DeckState,
        previous: Option<&DeckState>,
        now: DateTime<Utc>,
    ) -> DeckState {
        let mut deck = observed.clone();

        // Producer publishes basics only on first sight; carry our own
        // enrichment forward when the producer dropped it but the track
        // did not change.
        if deck.enrichment.is_none() {
            if let Some(prev) = previous {
                if prev.same_identity(&deck) {
                    deck.enrichment = prev.enrichment.clone();
                    deck.pending_enrichment = prev.pending_enrichment.clone();
                    deck.transition = prev.transition.clone();
                }
            }
        }

        transition::expire_transition(&mut deck, now);
        let phase = transition::deck_phase(&deck, now);

        let identity_changed = previous.is_some_and(|prev| !prev.same_identity(&deck));

        let Some(identity) = deck.identity() else {
            // No readable track on this deck; keep whatever is there.
            return deck;
        };

        if identity_changed {
            info!("{}: track changed to '{}'", deck_id, identity.key());
            match phase {
                DeckPhase::Idle => {
                    // Track advanced while the deck is not flagged playing:
                    // recompute proactively, but without a transition window.
                    deck.transition = None;
                    deck.pending_enrichment = None;
                }
                DeckPhase::SteadyState | DeckPhase::Transitioning => {
                    transition::begin_transition(
                        &mut deck,
                        now,
                        self.settings.transition_duration_secs,
                    );
                }
            }
            deck.enrichment = Some(self.build_enrichment(&identity, &deck, None, now).await);
            return deck;
        }

        if phase == DeckPhase::Idle {
            // Paused deck with unchanged identity keeps its enrichment so
            // the display does not reset.
            return deck;
        }

        let expected = Self::expected_parts(&deck);
        if transition::is_stale(&deck, &expected) {
            debug!("{}: enrichment stale for '{}'", deck_id, identity.key());
            let existing = deck.enrichment.take();
            deck.enrichment = Some(
                self.build_enrichment(&identity, &deck, existing.as_ref(), now)
                    .await,
            );
            return deck;
        }

        // Fresh enrichment: the only remaining work is folding in video
        // results that finished in the background since the last cycle.
        if let Some(payload) = deck.enrichment.as_mut() {
            self.merge_ready_videos(&identity, payload).await;
        }
        self.spawn_video_fetch_if_needed(&identity).await;

        deck
    }

    /// Compute a payload for `identity`, reusing the existing pool when the
    /// policy-derived parts still match (no external call needed).
    async fn build_enrichment(
        &self,
        identity: &TrackIdentity,
        deck: &DeckState,
        existing: Option<&EnrichedPayload>,
        now: DateTime<Utc>,
    ) -> EnrichedPayload {
        let title = deck.title.as_deref().unwrap_or_default();
        let artist = deck.artist.as_deref().unwrap_or_default();

        let reusable = existing.filter(|payload| {
            payload.fetch_query_parts == Self::expected_parts(deck)
                && !payload.media_pool.is_empty()
        });

        let mut payload = match reusable {
            Some(existing) => {
                // Same track, same policy, pool already amortized: reselect
                // from the pool without touching the network. The derived
                // fields are recomputed from stored data so a partially
                // drained payload heals itself.
                debug!("Reusing media pool for '{}'", identity.key());
                let mut payload = existing.clone();
                let derived = derive_query(title, artist, deck.key.as_deref(), &payload.tags);
                payload.keywords = derived.keywords;
                payload.keyword_scores = derived.keyword_scores;
                payload.key_characteristics = derived.key_characteristics;
                payload
            }
            None => {
                let tags = self.fetch_tags(artist, title).await;
                let derived = derive_query(title, artist, deck.key.as_deref(), &tags);
                let (pool, fetch_status) = self.fetch_pool(&derived).await;
                EnrichedPayload {
                    tags,
                    keywords: derived.keywords,
                    keyword_scores: derived.keyword_scores,
                    key_characteristics: derived.key_characteristics,
                    media_items: vec![],
                    media_pool: pool,
                    fetch_query: derived.query,
                    fetch_query_parts: derived.parts,
                    track_started_at: now,
                    fetch_status,
                }
            }
        };

        self.merge_ready_videos(identity, &mut payload).await;
        self.spawn_video_fetch_if_needed(identity).await;

        payload.media_items = self
            .history
            .select(&identity.artist, &payload.media_pool, self.settings.media_count)
            .await;

        payload
    }

    /// Tag lookup, one limiter unit; failures and denial both mean "no tags
    /// this cycle".
    async fn fetch_tags(&self, artist: &str, title: &str) -> Vec<String> {
        let Some(provider) = &self.tag_provider else {
            return vec![];
        };
        if !self.limiter.try_admit(1).await {
            debug!("Tag lookup for '{} - {}' denied by rate limiter", artist, title);
            return vec![];
        }
        match provider.track_tags(artist, title).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Tag lookup failed for '{} - {}': {}", artist, title, e);
                vec![]
            }
        }
    }

    /// Candidate pool from the live provider, degrading to the offline bank
    /// on denial, failure or an empty result.
    async fn fetch_pool(&self, derived: &DerivedQuery) -> (Vec<crate::state_store::MediaItem>, FetchStatus) {
        let Some(provider) = &self.media_provider else {
            return (
                self.bank.select(&derived.keywords, self.settings.pool_size),
                FetchStatus::Offline,
            );
        };

        // Admission records the unit up front, so a slow or failing call
        // still counts against the budget.
        if !self.limiter.try_admit(1).await {
            info!("Media search denied by rate limiter, serving offline bank");
            return (
                self.bank.select(&derived.keywords, self.settings.pool_size),
                FetchStatus::RateLimited,
            );
        }
        match provider.search(&derived.query, self.settings.pool_size).await {
            Ok(pool) if !pool.is_empty() => (pool, FetchStatus::Live),
            Ok(_) => {
                debug!("Provider returned nothing for '{}'", derived.query);
                (
                    self.bank.select(&derived.keywords, self.settings.pool_size),
                    FetchStatus::Offline,
                )
            }
            Err(e) => {
                warn!("Media search failed for '{}': {}", derived.query, e);
                (
                    self.bank.select(&derived.keywords, self.settings.pool_size),
                    FetchStatus::Failed,
                )
            }
        }
    }

    /// Fold completed background video fetches into the pool. Returns
    /// whether anything new arrived.
    async fn merge_ready_videos(&self, identity: &TrackIdentity, payload: &mut EnrichedPayload) -> bool {
        if self.video_provider.is_none() {
            return false;
        }
        let Some(entry) = self.cache.get(&identity.key()).await else {
            return false;
        };
        if entry.status != CacheStatus::Ready {
            return false;
        }

        let known: HashSet<&str> = payload.media_pool.iter().map(|i| i.id.as_str()).collect();
        let fresh: Vec<_> = entry
            .payload
            .into_iter()
            .filter(|item| !known.contains(item.id.as_str()))
            .collect();
        if fresh.is_empty() {
            return false;
        }

        info!(
            "Merging {} background video results for '{}'",
            fresh.len(),
            identity.key()
        );
        // Videos go to the front so the next selection prefers them.
        let mut pool = fresh;
        pool.append(&mut payload.media_pool);
        payload.media_pool = pool;
        payload.media_items = self
            .history
            .select(&identity.artist, &payload.media_pool, self.settings.media_count)
            .await;
        true
    }

    /// Hand the slow video lookup to the fetch cache. The worker asks the
    /// limiter itself, right before the call; workers for both decks may run
    /// at once, which `try_admit` handles atomically.
    async fn spawn_video_fetch_if_needed(&self, identity: &TrackIdentity) {
        let Some(provider) = &self.video_provider else {
            return;
        };
        let provider = Arc::clone(provider);
        let limiter = Arc::clone(&self.limiter);
        let query = identity.key().replace('|', " ");
        let pool_size = self.settings.video_pool_size;

        self.cache
            .start_if_needed(&identity.key(), async move {
                if !limiter.try_admit(1).await {
                    // Not an error; the cache's empty-cooldown schedules a
                    // retry once budget frees up.
                    return Ok(vec![]);
                }
                let items = provider.search(&query, pool_size).await?;
                Ok(items)
            })
            .await;
    }
}
