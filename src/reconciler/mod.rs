//! The reconciliation pipeline: change detection, per-deck enrichment,
//! transition handling and document merging, driven by a poll loop.

mod change_detector;
mod merge;
mod orchestrator;
mod runner;
mod transition;

pub use change_detector::ChangeDetector;
pub use merge::merge_snapshot;
pub use orchestrator::{EnrichmentOrchestrator, EnrichmentSettings};
pub use runner::{Reconciler, ReconcilerSettings};
pub use transition::{begin_transition, deck_phase, expire_transition, is_stale, DeckPhase};
