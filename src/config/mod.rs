mod file_config;

pub use file_config::{
    EnrichmentConfig, FetchCacheConfig, FileConfig, ProvidersConfig, RateLimiterConfig,
};

use crate::fetch_cache::FetchCacheSettings;
use crate::rate_limiter::RateLimiterSettings;
use crate::reconciler::{EnrichmentSettings, ReconcilerSettings};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub state_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub bank_path: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub debounce_secs: u64,
    pub giphy_api_key: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub video_service_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub state_path: PathBuf,
    pub data_dir: PathBuf,
    pub bank_path: Option<PathBuf>,

    // Feature configs (with defaults)
    pub reconciler: ReconcilerSettings,
    pub rate_limiter: RateLimiterSettings,
    pub enrichment: EnrichmentSettings,
    pub fetch_cache: FetchCacheSettings,
    pub history_size: usize,
    pub providers: ProviderSettings,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub giphy_api_key: Option<String>,
    pub giphy_base_url: Option<String>,
    pub giphy_timeout_sec: u64,
    pub lastfm_api_key: Option<String>,
    pub lastfm_max_tags: usize,
    pub video_service_url: Option<String>,
    pub video_timeout_sec: u64,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let state_path = file
            .state_path
            .map(PathBuf::from)
            .or_else(|| cli.state_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("state_path must be specified via --state-path or in config file")
            })?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .or_else(|| state_path.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        let bank_path = file
            .bank_path
            .map(PathBuf::from)
            .or_else(|| cli.bank_path.clone());
        if let Some(path) = &bank_path {
            if !path.exists() {
                bail!("Offline media bank file not found: {:?}", path);
            }
        }

        let poll_interval_secs = file.poll_interval_secs.unwrap_or(cli.poll_interval_secs);
        if poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        let debounce_secs = file.debounce_secs.unwrap_or(cli.debounce_secs);
        let sweep_interval_secs = file.sweep_interval_secs.unwrap_or(60);

        let reconciler = ReconcilerSettings {
            poll_interval: Duration::from_secs(poll_interval_secs),
            debounce: Duration::from_secs(debounce_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            watch_path: Some(state_path.clone()),
        };

        // Rate limiter settings - merge file config with defaults
        let rl_file = file.rate_limiter.unwrap_or_default();
        let rate_limiter = RateLimiterSettings {
            window: Duration::from_secs(rl_file.window_secs.unwrap_or(3600)),
            max_requests: rl_file.max_requests.unwrap_or(90),
            enabled: rl_file.enabled.unwrap_or(true),
        };

        let en_file = file.enrichment.unwrap_or_default();
        let enrichment = EnrichmentSettings {
            media_count: en_file.media_count.unwrap_or(5),
            pool_size: en_file.pool_size.unwrap_or(25),
            transition_duration_secs: en_file.transition_duration_secs.unwrap_or(2.0),
            video_pool_size: en_file.video_pool_size.unwrap_or(3),
        };
        let history_size = en_file
            .history_size
            .unwrap_or(crate::history::DEFAULT_HISTORY_SIZE);

        let fc_file = file.fetch_cache.unwrap_or_default();
        let fetch_cache = FetchCacheSettings {
            empty_cooldown: Duration::from_secs(fc_file.empty_cooldown_secs.unwrap_or(300)),
            error_cooldown: Duration::from_secs(fc_file.error_cooldown_secs.unwrap_or(60)),
            retention: Duration::from_secs(fc_file.retention_secs.unwrap_or(60)),
            stale_pending: Duration::from_secs(fc_file.stale_pending_secs.unwrap_or(600)),
        };

        let pr_file = file.providers.unwrap_or_default();
        let providers = ProviderSettings {
            giphy_api_key: pr_file.giphy_api_key.or_else(|| cli.giphy_api_key.clone()),
            giphy_base_url: pr_file.giphy_base_url,
            giphy_timeout_sec: pr_file.giphy_timeout_sec.unwrap_or(10),
            lastfm_api_key: pr_file.lastfm_api_key.or_else(|| cli.lastfm_api_key.clone()),
            lastfm_max_tags: pr_file.lastfm_max_tags.unwrap_or(5),
            video_service_url: pr_file
                .video_service_url
                .or_else(|| cli.video_service_url.clone()),
            video_timeout_sec: pr_file.video_timeout_sec.unwrap_or(120),
        };

        Ok(Self {
            state_path,
            data_dir,
            bank_path,
            reconciler,
            rate_limiter,
            enrichment,
            fetch_cache,
            history_size,
            providers,
        })
    }

    pub fn history_state_path(&self) -> PathBuf {
        self.data_dir.join("media_history.json")
    }

    pub fn rate_limiter_state_path(&self) -> PathBuf {
        self.data_dir.join("rate_limiter_state.json")
    }
}
