use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub state_path: Option<String>,
    pub data_dir: Option<String>,
    pub bank_path: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub debounce_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,

    // Feature configs
    pub rate_limiter: Option<RateLimiterConfig>,
    pub enrichment: Option<EnrichmentConfig>,
    pub providers: Option<ProvidersConfig>,
    pub fetch_cache: Option<FetchCacheConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub window_secs: Option<u64>,
    pub max_requests: Option<usize>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub media_count: Option<usize>,
    pub pool_size: Option<usize>,
    pub transition_duration_secs: Option<f64>,
    pub video_pool_size: Option<usize>,
    pub history_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub giphy_api_key: Option<String>,
    pub giphy_base_url: Option<String>,
    pub giphy_timeout_sec: Option<u64>,
    pub lastfm_api_key: Option<String>,
    pub lastfm_max_tags: Option<usize>,
    pub video_service_url: Option<String>,
    pub video_timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FetchCacheConfig {
    pub empty_cooldown_secs: Option<u64>,
    pub error_cooldown_secs: Option<u64>,
    pub retention_secs: Option<u64>,
    pub stale_pending_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
