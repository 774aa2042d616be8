//! Offline media bank.
//!
//! A small curated bank (built from previously fetched media) loaded once at
//! startup. Serves as the fallback whenever the limiter denies a live call
//! or the provider fails, so the published document never goes without
//! media just because the network did.

use crate::state_store::MediaItem;
use rand::seq::{IteratorRandom, SliceRandom};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Deserialize)]
struct BankFile {
    #[serde(default)]
    items: Vec<MediaItem>,
}

pub struct OfflineMediaBank {
    items: Vec<MediaItem>,
}

impl OfflineMediaBank {
    /// Load the bank from a JSON file. A missing or unreadable bank is an
    /// empty bank, not an error.
    pub fn load(path: &Path) -> Self {
        let items = match std::fs::read(path) {
            Ok(raw) => match serde_json::from_slice::<BankFile>(&raw) {
                Ok(bank) => {
                    info!("Loaded {} items from offline media bank", bank.items.len());
                    bank.items
                }
                Err(e) => {
                    warn!("Failed to parse media bank at {:?}: {}", path, e);
                    Vec::new()
                }
            },
            Err(_) => {
                warn!("Offline media bank not found at {:?}", path);
                Vec::new()
            }
        };
        Self { items }
    }

    pub fn from_items(items: Vec<MediaItem>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items best matching `keywords`: a title hit outranks a tag hit;
    /// keywords with no exact hits fall back to partial word matches, then
    /// to a random sample. Ties are randomized so the same query does not
    /// always return the same subset.
    pub fn select(&self, keywords: &[String], limit: usize) -> Vec<MediaItem> {
        if self.items.is_empty() || limit == 0 {
            return Vec::new();
        }

        let lowered: Vec<String> = keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        if lowered.is_empty() {
            return self.random_sample(limit);
        }

        let mut scored: Vec<(i64, &MediaItem)> = self
            .items
            .iter()
            .filter_map(|item| {
                let title = item.title.to_lowercase();
                let tags: Vec<String> = item.tags.iter().map(|t| t.to_lowercase()).collect();
                let mut score = 0i64;
                for kw in &lowered {
                    if title.contains(kw) {
                        score += 2;
                    } else if tags.iter().any(|tag| tag.contains(kw)) {
                        score += 1;
                    }
                }
                (score > 0).then_some((score, item))
            })
            .collect();

        if !scored.is_empty() {
            scored.shuffle(&mut rand::rng());
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            return scored
                .into_iter()
                .take(limit)
                .map(|(_, item)| item.clone())
                .collect();
        }

        // Partial match on individual keyword words before going random.
        let partial: Vec<&MediaItem> = self
            .items
            .iter()
            .filter(|item| {
                let haystack = format!("{} {}", item.title, item.tags.join(" ")).to_lowercase();
                lowered
                    .iter()
                    .flat_map(|kw| kw.split_whitespace())
                    .any(|word| word.len() > 3 && haystack.contains(word))
            })
            .collect();

        if !partial.is_empty() {
            return partial.into_iter().take(limit).cloned().collect();
        }

        self.random_sample(limit)
    }

    fn random_sample(&self, limit: usize) -> Vec<MediaItem> {
        self.items
            .iter()
            .choose_multiple(&mut rand::rng(), limit.min(self.items.len()))
            .into_iter()
            .cloned()
            .collect()
    }
}
