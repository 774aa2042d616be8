//! Change detection and debouncing for reconciliation triggers.
//!
//! Only the basic producer-owned fields participate in the comparison;
//! enrichment fields are written by the reconciler itself and would
//! otherwise make every publish look like a change.

use crate::state_store::{DeckId, DeckState, TrackSnapshot};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
struct DeckBasics {
    title: Option<String>,
    artist: Option<String>,
    bpm: Option<f64>,
    key: Option<String>,
    is_playing: bool,
}

impl From<&DeckState> for DeckBasics {
    fn from(deck: &DeckState) -> Self {
        Self {
            title: deck.title.clone(),
            artist: deck.artist.clone(),
            bpm: deck.bpm,
            key: deck.key.clone(),
            is_playing: deck.is_playing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SnapshotBasics {
    deck1: DeckBasics,
    deck2: DeckBasics,
    active_deck: DeckId,
}

impl From<&TrackSnapshot> for SnapshotBasics {
    fn from(snapshot: &TrackSnapshot) -> Self {
        Self {
            deck1: (&snapshot.deck1).into(),
            deck2: (&snapshot.deck2).into(),
            active_deck: snapshot.active_deck,
        }
    }
}

pub struct ChangeDetector {
    last_processed: Option<SnapshotBasics>,
    last_trigger_at: Option<Instant>,
    debounce: Duration,
}

impl ChangeDetector {
    pub fn new(debounce: Duration) -> Self {
        Self {
            last_processed: None,
            last_trigger_at: None,
            debounce,
        }
    }

    /// Decide whether this snapshot warrants a reconciliation cycle.
    ///
    /// `stale_hint` is the orchestrator's independent staleness report for
    /// the active deck; it forces a cycle even when basics are unchanged.
    /// A play-state flip on the previously active deck bypasses the
    /// debounce window entirely.
    pub fn should_process(
        &mut self,
        snapshot: &TrackSnapshot,
        stale_hint: bool,
        now: Instant,
    ) -> bool {
        let basics = SnapshotBasics::from(snapshot);

        let Some(last) = &self.last_processed else {
            self.mark_processed(basics, now);
            return true;
        };

        let active_play_flip = match last.active_deck {
            DeckId::Deck1 => last.deck1.is_playing != basics.deck1.is_playing,
            DeckId::Deck2 => last.deck2.is_playing != basics.deck2.is_playing,
        };

        let changed = *last != basics;
        if !changed && !stale_hint && !active_play_flip {
            return false;
        }

        let within_debounce = self
            .last_trigger_at
            .is_some_and(|t| now.duration_since(t) < self.debounce);
        if within_debounce && !active_play_flip {
            debug!("Trigger suppressed by debounce window");
            return false;
        }

        self.mark_processed(basics, now);
        true
    }

    fn mark_processed(&mut self, basics: SnapshotBasics, now: Instant) {
        self.last_processed = Some(basics);
        self.last_trigger_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(title1: &str, playing1: bool) -> TrackSnapshot {
        let mut snapshot = TrackSnapshot::default();
        snapshot.deck1.title = Some(title1.to_string());
        snapshot.deck1.artist = Some("X".to_string());
        snapshot.deck1.is_playing = playing1;
        snapshot
    }

    #[test]
    fn test_first_snapshot_always_processes() {
        let mut detector = ChangeDetector::new(Duration::from_millis(0));
        assert!(detector.should_process(&snapshot("A", true), false, Instant::now()));
    }

    #[test]
    fn test_unchanged_basics_skip() {
        let mut detector = ChangeDetector::new(Duration::from_millis(0));
        let now = Instant::now();
        assert!(detector.should_process(&snapshot("A", true), false, now));
        assert!(!detector.should_process(&snapshot("A", true), false, now));
    }

    #[test]
    fn test_enrichment_changes_do_not_trigger() {
        let mut detector = ChangeDetector::new(Duration::from_millis(0));
        let now = Instant::now();
        let base = snapshot("A", true);
        assert!(detector.should_process(&base, false, now));

        let mut enriched = base.clone();
        enriched.sequence = 99;
        enriched.deck1.enrichment = None; // identical basics either way
        assert!(!detector.should_process(&enriched, false, now));
    }

    #[test]
    fn test_title_change_triggers() {
        let mut detector = ChangeDetector::new(Duration::from_millis(0));
        let now = Instant::now();
        assert!(detector.should_process(&snapshot("A", true), false, now));
        assert!(detector.should_process(&snapshot("B", true), false, now));
    }

    #[test]
    fn test_stale_hint_forces_processing() {
        let mut detector = ChangeDetector::new(Duration::from_millis(0));
        let now = Instant::now();
        assert!(detector.should_process(&snapshot("A", true), false, now));
        assert!(detector.should_process(&snapshot("A", true), true, now));
    }

    #[test]
    fn test_debounce_suppresses_bursts() {
        let mut detector = ChangeDetector::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(detector.should_process(&snapshot("A", true), false, now));
        // A real change, but inside the debounce window.
        assert!(!detector.should_process(&snapshot("B", true), false, now));
        // Outside the window it goes through.
        assert!(detector.should_process(
            &snapshot("B", true),
            false,
            now + Duration::from_secs(61)
        ));
    }

    #[test]
    fn test_active_deck_play_flip_bypasses_debounce() {
        let mut detector = ChangeDetector::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(detector.should_process(&snapshot("A", true), false, now));
        // deck1 is the active deck; it pausing must not wait out the window.
        assert!(detector.should_process(&snapshot("A", false), false, now));
    }
}
