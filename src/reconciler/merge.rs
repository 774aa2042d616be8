//! Assembly of the outgoing document from the reconciled deck states.

use crate::state_store::{DeckId, DeckState, TrackSnapshot};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Build the document to publish from the freshly reconciled decks.
///
/// The sequence number strictly increases past both the observed document
/// (the producer may have bumped it) and the last one we published. The
/// active deck follows whichever deck is playing; when neither is, the
/// previous active deck is kept so a brief double-pause during a mix does
/// not flip the display back and forth.
pub fn merge_snapshot(
    observed: &TrackSnapshot,
    deck1: DeckState,
    deck2: DeckState,
    previous: Option<&TrackSnapshot>,
    now: DateTime<Utc>,
) -> TrackSnapshot {
    let active_deck = resolve_active_deck(&deck1, &deck2, observed, previous);

    let base_sequence = previous
        .map(|p| p.sequence)
        .unwrap_or(0)
        .max(observed.sequence);

    TrackSnapshot {
        deck1,
        deck2,
        active_deck,
        sequence: base_sequence + 1,
        published_at: Some(now),
    }
}

fn resolve_active_deck(
    deck1: &DeckState,
    deck2: &DeckState,
    observed: &TrackSnapshot,
    previous: Option<&TrackSnapshot>,
) -> DeckId {
    match (deck1.is_playing, deck2.is_playing) {
        (true, false) => DeckId::Deck1,
        (false, true) => DeckId::Deck2,
        // Both playing mid-mix: trust the producer's pick.
        (true, true) => observed.active_deck,
        (false, false) => {
            let kept = previous.map(|p| p.active_deck).unwrap_or(observed.active_deck);
            debug!("Neither deck playing, keeping active deck {}", kept);
            kept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(title: &str) -> DeckState {
        DeckState {
            title: Some(title.to_string()),
            artist: Some("X".to_string()),
            is_playing: true,
            ..Default::default()
        }
    }

    fn idle(title: &str) -> DeckState {
        DeckState {
            is_playing: false,
            ..playing(title)
        }
    }

    #[test]
    fn test_active_deck_follows_playing_deck() {
        let observed = TrackSnapshot::default();
        let merged = merge_snapshot(&observed, idle("A"), playing("B"), None, Utc::now());
        assert_eq!(merged.active_deck, DeckId::Deck2);
    }

    #[test]
    fn test_flap_guard_keeps_previous_active_when_neither_plays() {
        let previous = TrackSnapshot {
            active_deck: DeckId::Deck2,
            sequence: 4,
            ..Default::default()
        };
        let observed = TrackSnapshot {
            active_deck: DeckId::Deck1,
            sequence: 5,
            ..Default::default()
        };
        let merged = merge_snapshot(&observed, idle("A"), idle("B"), Some(&previous), Utc::now());
        assert_eq!(merged.active_deck, DeckId::Deck2);
    }

    #[test]
    fn test_both_playing_trusts_observed() {
        let observed = TrackSnapshot {
            active_deck: DeckId::Deck2,
            ..Default::default()
        };
        let merged = merge_snapshot(&observed, playing("A"), playing("B"), None, Utc::now());
        assert_eq!(merged.active_deck, DeckId::Deck2);
    }

    #[test]
    fn test_sequence_strictly_increases_past_both_sides() {
        let previous = TrackSnapshot {
            sequence: 9,
            ..Default::default()
        };
        let observed = TrackSnapshot {
            sequence: 7,
            ..Default::default()
        };
        let merged = merge_snapshot(&observed, idle("A"), playing("B"), Some(&previous), Utc::now());
        assert_eq!(merged.sequence, 10);

        let observed_ahead = TrackSnapshot {
            sequence: 12,
            ..Default::default()
        };
        let merged = merge_snapshot(&observed_ahead, idle("A"), playing("B"), Some(&previous), Utc::now());
        assert_eq!(merged.sequence, 13);
    }

    #[test]
    fn test_published_at_is_set() {
        let now = Utc::now();
        let merged = merge_snapshot(&TrackSnapshot::default(), idle("A"), playing("B"), None, now);
        assert_eq!(merged.published_at, Some(now));
    }
}
