//! Shared state store: the typed now-playing document and the atomic
//! publish/read protocol the two loops coordinate through.

mod document;
mod file_store;

pub use document::{
    DeckId, DeckState, EnrichedPayload, FetchStatus, MediaItem, TrackIdentity, TrackSnapshot,
    TransitionState,
};
pub use file_store::{FileStateStore, MemoryStateStore, StateStore};
