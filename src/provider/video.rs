//! Client for the external music-video service.
//!
//! Video lookup is the slow fetch of the pipeline: the service may download
//! and transcode before answering, so calls always run inside fetch-cache
//! workers, never on the reconciliation cycle.

use super::{MediaProvider, ProviderError};
use crate::state_store::MediaItem;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub struct VideoServiceClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct VideoSearchResponse {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Deserialize)]
struct Video {
    id: String,
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    mime: Option<String>,
}

impl VideoServiceClient {
    /// `base_url` e.g. "http://localhost:8089". The timeout is generous by
    /// design: the service downloads on demand.
    pub fn new(base_url: &str, timeout_sec: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MediaProvider for VideoServiceClient {
    async fn search(
        &self,
        query: &str,
        pool_size: usize,
    ) -> Result<Vec<MediaItem>, ProviderError> {
        let url = format!(
            "{}/search?query={}&limit={}",
            self.base_url,
            urlencoding::encode(query),
            pool_size
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let body: VideoSearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let items = body
            .videos
            .into_iter()
            .map(|v| MediaItem {
                title: v.title.unwrap_or_else(|| v.id.clone()),
                id: v.id,
                url: v.url,
                mime: v.mime.or_else(|| Some("video/mp4".to_string())),
                source: Some("video_service".to_string()),
                tags: vec![],
            })
            .collect();

        Ok(items)
    }
}
