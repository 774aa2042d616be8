//! Last.fm top-tags lookup used to seed enrichment keywords.

use super::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

/// A tag/keyword service queried per track. One rate-limiter unit per call.
#[async_trait]
pub trait TagProvider: Send + Sync {
    async fn track_tags(&self, artist: &str, title: &str) -> Result<Vec<String>, ProviderError>;
}

pub struct LastFmTagClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_tags: usize,
}

#[derive(Deserialize)]
struct TopTagsResponse {
    toptags: Option<TopTagsContainer>,
}

#[derive(Deserialize)]
struct TopTagsContainer {
    tag: Option<Vec<LastFmTag>>,
}

#[derive(Deserialize)]
struct LastFmTag {
    name: Option<String>,
}

impl LastFmTagClient {
    pub fn new(
        api_key: &str,
        base_url: Option<&str>,
        max_tags: usize,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            max_tags,
        })
    }
}

#[async_trait]
impl TagProvider for LastFmTagClient {
    async fn track_tags(&self, artist: &str, title: &str) -> Result<Vec<String>, ProviderError> {
        let url = format!(
            "{}?method=track.gettoptags&artist={}&track={}&api_key={}&format=json&autocorrect=1",
            self.base_url,
            urlencoding::encode(artist),
            urlencoding::encode(title),
            self.api_key
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            // Rate limited by the provider itself: no tags this cycle.
            if response.status().as_u16() == 429 {
                return Ok(vec![]);
            }
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let body: TopTagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let tags = body
            .toptags
            .and_then(|t| t.tag)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|t| t.name)
            .filter(|name| !name.is_empty())
            .take(self.max_tags)
            .collect();

        Ok(tags)
    }
}
