//! Keyword derivation for media search.
//!
//! Maps Camelot wheel keys onto a fixed taxonomy of mood characteristics and
//! combines them with provider tags and title tokens into scored keywords
//! plus the provider query. The query parts derive from basic fields only
//! (title/artist/key), so the staleness check can compare them against a
//! stored payload without any network access.

use std::collections::HashMap;
use tracing::warn;

/// Mood characteristics for a Camelot wheel key (`1A`..`12A`, `1B`..`12B`).
///
/// Unknown or missing keys yield an empty list.
pub fn key_characteristics(key: &str) -> Vec<String> {
    let normalized = key.trim().to_uppercase();
    let characteristics: &[&str] = match normalized.as_str() {
        // A keys (major)
        "1A" => &["innocent", "pure", "simple", "happy", "cheerful", "bright"],
        "2A" => &["triumphant", "victorious", "joyful", "energetic", "uplifting"],
        "3A" => &["warm", "tender", "gentle", "peaceful", "calm"],
        "4A" => &["optimistic", "hopeful", "bright", "energetic", "positive"],
        "5A" => &["majestic", "grand", "powerful", "confident", "bold"],
        "6A" => &["pastoral", "serene", "peaceful", "gentle", "calm"],
        "7A" => &["bright", "cheerful", "energetic", "uplifting", "happy"],
        "8A" => &["heroic", "triumphant", "powerful", "confident", "bold"],
        "9A" => &["warm", "tender", "gentle", "peaceful", "serene"],
        "10A" => &["bright", "cheerful", "energetic", "uplifting", "optimistic"],
        "11A" => &["majestic", "grand", "powerful", "confident", "bold"],
        "12A" => &["tender", "gentle", "peaceful", "calm", "serene"],
        // B keys (minor)
        "1B" | "3B" | "5B" | "7B" | "9B" | "11B" => {
            &["sad", "melancholic", "tender", "introspective", "emotional"]
        }
        "2B" | "4B" | "6B" | "8B" | "10B" | "12B" => {
            &["mysterious", "dark", "brooding", "intense", "dramatic"]
        }
        "" => return Vec::new(),
        other => {
            warn!(
                "Unknown key format '{}', expected Camelot wheel (e.g. '1A', '12B')",
                other
            );
            return Vec::new();
        }
    };
    characteristics.iter().map(|s| s.to_string()).collect()
}

/// Score weights by keyword source. Provider tags rank above key-derived
/// characteristics, which rank above raw title tokens.
const TAG_WEIGHT: f64 = 1.0;
const CHARACTERISTIC_WEIGHT: f64 = 0.8;
const TITLE_TOKEN_WEIGHT: f64 = 0.5;

const TITLE_STOPWORDS: &[&str] = &[
    "the", "and", "feat", "featuring", "with", "remix", "edit", "version", "original", "extended",
    "radio", "mix",
];

/// Everything the orchestrator derives from one track's basic fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedQuery {
    /// The provider search query.
    pub query: String,
    /// The policy-derived parts the query was built from. Stored on the
    /// payload; a mismatch on a later cycle marks the enrichment stale.
    pub parts: Vec<String>,
    pub keywords: Vec<String>,
    pub keyword_scores: HashMap<String, f64>,
    pub key_characteristics: Vec<String>,
}

/// Derive the search query and scored keywords for a track.
///
/// `tags` may be empty (tag provider unavailable or rate limited); the query
/// parts deliberately exclude tags so the derivation stays reproducible from
/// the snapshot alone.
pub fn derive_query(title: &str, artist: &str, key: Option<&str>, tags: &[String]) -> DerivedQuery {
    let characteristics = key.map(key_characteristics).unwrap_or_default();

    let mut parts: Vec<String> = vec![artist.trim().to_lowercase()];
    parts.extend(characteristics.iter().take(2).cloned());
    let query = parts.join(" ");

    let mut keywords = Vec::new();
    let mut keyword_scores = HashMap::new();
    let mut push = |kw: &str, score: f64| {
        let kw = kw.trim().to_lowercase();
        if kw.is_empty() || keyword_scores.contains_key(&kw) {
            return;
        }
        keyword_scores.insert(kw.clone(), score);
        keywords.push(kw);
    };

    for tag in tags {
        push(tag, TAG_WEIGHT);
    }
    for characteristic in &characteristics {
        push(characteristic, CHARACTERISTIC_WEIGHT);
    }
    for token in title.split_whitespace() {
        let token: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if token.len() > 3 && !TITLE_STOPWORDS.contains(&token.as_str()) {
            push(&token, TITLE_TOKEN_WEIGHT);
        }
    }

    DerivedQuery {
        query,
        parts,
        keywords,
        keyword_scores,
        key_characteristics: characteristics,
    }
}
