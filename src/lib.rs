//! Deckwatch Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod fetch_cache;
pub mod history;
pub mod keywords;
pub mod provider;
pub mod rate_limiter;
pub mod reconciler;
pub mod state_store;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use reconciler::{EnrichmentOrchestrator, EnrichmentSettings, Reconciler, ReconcilerSettings};
pub use state_store::{DeckId, DeckState, FileStateStore, MemoryStateStore, StateStore, TrackSnapshot};
