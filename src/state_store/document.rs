//! Typed documents for the shared now-playing state.
//!
//! The producer (the capture process) writes the basic per-deck fields and
//! `active_deck`; everything under `enrichment`/`pending_enrichment` is owned
//! by the reconciler and only round-tripped by the producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One of the two playback slots being monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckId {
    #[serde(rename = "deck1")]
    Deck1,
    #[serde(rename = "deck2")]
    Deck2,
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeckId::Deck1 => write!(f, "deck1"),
            DeckId::Deck2 => write!(f, "deck2"),
        }
    }
}

/// The (title, artist) pair that decides "same track vs. new track".
///
/// Comparison is whitespace-normalized and case-insensitive, so OCR casing
/// jitter from the producer does not count as a track change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackIdentity {
    pub title: String,
    pub artist: String,
}

impl TrackIdentity {
    pub fn new(title: &str, artist: &str) -> Self {
        Self {
            title: normalize(title),
            artist: normalize(artist),
        }
    }

    /// Stable key for cache buckets and log lines.
    pub fn key(&self) -> String {
        format!("{}|{}", self.artist, self.title)
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A single piece of auxiliary media attached to a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Where the enrichment's media came from on its last refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Media came from the live provider.
    Live,
    /// Limiter denied the call; served from the offline bank.
    RateLimited,
    /// Provider call failed; served from the offline bank.
    Failed,
    /// Offline bank by configuration (no provider available).
    Offline,
}

/// Derived auxiliary data for one track. Flat by construction: no field may
/// contain another `EnrichedPayload` (the previous payload lives in the
/// sibling `DeckState::pending_enrichment`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPayload {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub keyword_scores: HashMap<String, f64>,
    #[serde(default)]
    pub key_characteristics: Vec<String>,
    #[serde(default)]
    pub media_items: Vec<MediaItem>,
    #[serde(default)]
    pub media_pool: Vec<MediaItem>,
    pub fetch_query: String,
    #[serde(default)]
    pub fetch_query_parts: Vec<String>,
    pub track_started_at: DateTime<Utc>,
    pub fetch_status: FetchStatus,
}

/// Bounded time window immediately following a detected track change.
///
/// Carries its own duration so an in-flight transition keeps its original
/// length across a config change or process restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionState {
    pub in_progress: bool,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl TransitionState {
    pub fn begin(now: DateTime<Utc>, duration_secs: f64) -> Self {
        Self {
            in_progress: true,
            started_at: now,
            duration_secs,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let elapsed = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        elapsed >= self.duration_secs
    }
}

/// Per-deck slice of the shared document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeckState {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichedPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_enrichment: Option<EnrichedPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionState>,
}

impl DeckState {
    /// The track identity, if both title and artist are known and non-empty.
    pub fn identity(&self) -> Option<TrackIdentity> {
        match (self.title.as_deref(), self.artist.as_deref()) {
            (Some(t), Some(a)) if !t.trim().is_empty() && !a.trim().is_empty() => {
                Some(TrackIdentity::new(t, a))
            }
            _ => None,
        }
    }

    /// Whether `other` observes the same track as this deck state.
    pub fn same_identity(&self, other: &DeckState) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        }
    }
}

/// The shared document: both decks plus the active-deck selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub deck1: DeckState,
    pub deck2: DeckState,
    pub active_deck: DeckId,
    /// Monotonic publish counter; bumped by the merge writer so readers can
    /// detect missed updates instead of relying on timestamps alone.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl TrackSnapshot {
    pub fn deck(&self, id: DeckId) -> &DeckState {
        match id {
            DeckId::Deck1 => &self.deck1,
            DeckId::Deck2 => &self.deck2,
        }
    }

    pub fn deck_mut(&mut self, id: DeckId) -> &mut DeckState {
        match id {
            DeckId::Deck1 => &mut self.deck1,
            DeckId::Deck2 => &mut self.deck2,
        }
    }
}

impl Default for TrackSnapshot {
    fn default() -> Self {
        Self {
            deck1: DeckState::default(),
            deck2: DeckState::default(),
            active_deck: DeckId::Deck1,
            sequence: 0,
            published_at: None,
        }
    }
}
