//! Giphy search API client.

use super::{MediaProvider, ProviderError};
use crate::state_store::MediaItem;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.giphy.com";

pub struct GiphyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    data: Option<Vec<Gif>>,
}

#[derive(Deserialize)]
struct Gif {
    id: Option<String>,
    title: Option<String>,
    images: Option<GifImages>,
}

#[derive(Deserialize)]
struct GifImages {
    original: Option<GifRendition>,
}

#[derive(Deserialize)]
struct GifRendition {
    url: Option<String>,
    mp4: Option<String>,
}

impl GiphyClient {
    pub fn new(api_key: &str, base_url: Option<&str>, timeout_sec: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl MediaProvider for GiphyClient {
    async fn search(
        &self,
        query: &str,
        pool_size: usize,
    ) -> Result<Vec<MediaItem>, ProviderError> {
        let url = format!(
            "{}/v1/gifs/search?api_key={}&q={}&limit={}&rating=pg-13",
            self.base_url,
            self.api_key,
            urlencoding::encode(query),
            pool_size
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let gifs = body.data.unwrap_or_default();
        let items = gifs
            .into_iter()
            .filter_map(|gif| {
                let id = gif.id?;
                let rendition = gif.images?.original?;
                // Prefer the mp4 rendition when present, it plays cheaper.
                let (url, mime) = match rendition.mp4 {
                    Some(mp4) if !mp4.is_empty() => (mp4, "video/mp4"),
                    _ => (rendition.url?, "image/gif"),
                };
                Some(MediaItem {
                    title: gif.title.unwrap_or_else(|| id.clone()),
                    id,
                    url,
                    mime: Some(mime.to_string()),
                    source: Some("giphy".to_string()),
                    tags: vec![],
                })
            })
            .collect();

        Ok(items)
    }
}
