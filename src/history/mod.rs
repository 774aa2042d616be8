//! Bounded per-artist memory of recently served media.
//!
//! Keeps the UI from replaying the same clips every time an artist comes
//! back around: candidates that have not been served for this artist
//! recently are preferred, and served ids age out of a bounded FIFO. The
//! queues are persisted as JSON so the memory survives a restart.

use crate::state_store::MediaItem;
use anyhow::Context;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default bound on remembered ids per artist.
pub const DEFAULT_HISTORY_SIZE: usize = 30;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedHistory {
    #[serde(default)]
    artists: HashMap<String, Vec<String>>,
}

pub struct ArtistHistory {
    entries: Mutex<HashMap<String, VecDeque<String>>>,
    max_per_artist: usize,
    state_path: Option<PathBuf>,
}

impl ArtistHistory {
    pub fn new(max_per_artist: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_per_artist,
            state_path: None,
        }
    }

    /// History restored from and persisted to `state_path`. A missing or
    /// unreadable file starts empty.
    pub fn persisted(max_per_artist: usize, state_path: PathBuf) -> Self {
        let restored = match std::fs::read(&state_path) {
            Ok(raw) => match serde_json::from_slice::<PersistedHistory>(&raw) {
                Ok(state) => {
                    debug!(
                        "Restored history for {} artists from {:?}",
                        state.artists.len(),
                        state_path
                    );
                    state
                        .artists
                        .into_iter()
                        .map(|(k, v)| (k, v.into_iter().collect()))
                        .collect()
                }
                Err(e) => {
                    warn!("Corrupt artist history at {:?}: {}", state_path, e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            entries: Mutex::new(restored),
            max_per_artist,
            state_path: Some(state_path),
        }
    }

    fn persist(&self, entries: &HashMap<String, VecDeque<String>>) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = PersistedHistory {
            artists: entries
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
        };
        if let Err(e) = serde_json::to_vec(&state)
            .context("serialize artist history")
            .and_then(|body| std::fs::write(path, body).context("write artist history"))
        {
            warn!("Failed to persist artist history to {:?}: {}", path, e);
        }
    }

    /// Pick up to `max_count` items for `artist_key`, preferring candidates
    /// not served recently for this artist. Selected ids are remembered.
    ///
    /// Dedups by id and shuffles first so the provider's top results don't
    /// always win. When the pool is smaller than `max_count`, repeats are
    /// unavoidable and allowed.
    pub async fn select(
        &self,
        artist_key: &str,
        candidates: &[MediaItem],
        max_count: usize,
    ) -> Vec<MediaItem> {
        if candidates.is_empty() || max_count == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut unique: Vec<MediaItem> = candidates
            .iter()
            .filter(|item| seen.insert(item.id.clone()))
            .cloned()
            .collect();
        unique.shuffle(&mut rand::rng());

        let mut entries = self.entries.lock().await;
        let queue = entries.entry(artist_key.to_string()).or_default();
        let recent: HashSet<&String> = queue.iter().collect();

        let (fresh, used): (Vec<MediaItem>, Vec<MediaItem>) = unique
            .into_iter()
            .partition(|item| !recent.contains(&item.id));

        let selected: Vec<MediaItem> = fresh
            .into_iter()
            .chain(used)
            .take(max_count)
            .collect();

        for item in &selected {
            queue.push_back(item.id.clone());
        }
        while queue.len() > self.max_per_artist {
            queue.pop_front();
        }

        self.persist(&entries);
        selected
    }

    /// Recently served ids for an artist (tests/monitoring).
    pub async fn recent(&self, artist_key: &str) -> Vec<String> {
        let entries = self.entries.lock().await;
        entries
            .get(artist_key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            url: format!("https://media.example/{id}"),
            title: id.to_string(),
            mime: None,
            source: None,
            tags: vec![],
        }
    }

    fn pool(ids: &[&str]) -> Vec<MediaItem> {
        ids.iter().map(|id| item(id)).collect()
    }

    #[tokio::test]
    async fn test_select_dedups_and_bounds() {
        let history = ArtistHistory::new(10);
        let candidates = pool(&["a", "a", "b", "c"]);
        let selected = history.select("artist x", &candidates, 2).await;
        assert_eq!(selected.len(), 2);
        let ids: HashSet<_> = selected.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_no_repeats_across_consecutive_selects() {
        let history = ArtistHistory::new(10);
        let candidates = pool(&["a", "b", "c", "d", "e", "f"]);

        let first = history.select("artist x", &candidates, 3).await;
        let second = history.select("artist x", &candidates, 3).await;

        let first_ids: HashSet<_> = first.iter().map(|i| i.id.clone()).collect();
        for item in &second {
            assert!(
                !first_ids.contains(&item.id),
                "item {} repeated while fresh candidates remained",
                item.id
            );
        }
    }

    #[tokio::test]
    async fn test_small_pool_allows_repeats() {
        let history = ArtistHistory::new(10);
        let candidates = pool(&["a", "b"]);

        let first = history.select("artist x", &candidates, 2).await;
        let second = history.select("artist x", &candidates, 2).await;
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_history_evicts_oldest_beyond_bound() {
        let history = ArtistHistory::new(3);
        let candidates = pool(&["a", "b", "c", "d", "e"]);
        history.select("artist x", &candidates, 5).await;

        let recent = history.recent("artist x").await;
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn test_histories_are_per_artist() {
        let history = ArtistHistory::new(10);
        let candidates = pool(&["a", "b"]);
        history.select("artist x", &candidates, 2).await;

        // A different artist sees an untouched history.
        let other = history.select("artist y", &candidates, 2).await;
        assert_eq!(other.len(), 2);
        assert_eq!(history.recent("artist y").await.len(), 2);
    }

    #[tokio::test]
    async fn test_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let candidates = pool(&["a", "b", "c"]);

        {
            let history = ArtistHistory::persisted(10, path.clone());
            history.select("artist x", &candidates, 3).await;
        }

        let restarted = ArtistHistory::persisted(10, path);
        assert_eq!(restarted.recent("artist x").await.len(), 3);
    }
}
