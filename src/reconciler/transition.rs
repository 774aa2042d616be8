//! Per-deck track-transition state machine and the staleness predicate.

use crate::state_store::{DeckState, TransitionState};
use chrono::{DateTime, Utc};

/// Where a deck currently sits in its playback lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckPhase {
    /// Not playing.
    Idle,
    /// Playing, identity unchanged since the last enrichment.
    SteadyState,
    /// Playing, inside the window right after a track change.
    Transitioning,
}

/// Derive the phase of a deck at `now`.
pub fn deck_phase(deck: &DeckState, now: DateTime<Utc>) -> DeckPhase {
    if !deck.is_playing {
        return DeckPhase::Idle;
    }
    match &deck.transition {
        Some(t) if t.in_progress && !t.is_expired(now) => DeckPhase::Transitioning,
        _ => DeckPhase::SteadyState,
    }
}

/// Begin a transition window on a deck that just changed identity. The
/// previous enrichment moves to `pending_enrichment` so crossfade-style
/// consumers can blend old and new.
pub fn begin_transition(deck: &mut DeckState, now: DateTime<Utc>, duration_secs: f64) {
    deck.pending_enrichment = deck.enrichment.take();
    deck.transition = Some(TransitionState::begin(now, duration_secs));
}

/// Clear an expired transition and its pending payload. Returns whether
/// anything was cleared.
pub fn expire_transition(deck: &mut DeckState, now: DateTime<Utc>) -> bool {
    let expired = deck
        .transition
        .as_ref()
        .is_some_and(|t| t.is_expired(now));
    if expired {
        deck.transition = None;
        deck.pending_enrichment = None;
    }
    expired
}

/// Whether a deck's enrichment no longer matches its live track.
///
/// Stale when the payload is missing, when its derived fields are empty
/// despite a valid identity, or when its stored query parts differ from
/// `expected_parts` (the parts the current policy would generate). The last
/// arm lets a policy/config change self-heal without a literal track change.
pub fn is_stale(deck: &DeckState, expected_parts: &[String]) -> bool {
    if deck.identity().is_none() {
        // Nothing to enrich without an identity.
        return false;
    }
    let Some(payload) = &deck.enrichment else {
        return true;
    };
    if payload.keywords.is_empty() && payload.media_items.is_empty() {
        return true;
    }
    payload.fetch_query_parts != expected_parts
}
