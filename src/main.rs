use anyhow::{Context, Result};
use clap::Parser;
use deckwatch::config::{AppConfig, CliConfig, FileConfig};
use deckwatch::fetch_cache::MediaFetchCache;
use deckwatch::history::ArtistHistory;
use deckwatch::provider::{
    GiphyClient, LastFmTagClient, MediaProvider, OfflineMediaBank, TagProvider, VideoServiceClient,
};
use deckwatch::rate_limiter::SlidingWindowLimiter;
use deckwatch::reconciler::{EnrichmentOrchestrator, Reconciler};
use deckwatch::state_store::FileStateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the shared now-playing JSON document.
    #[clap(value_parser = parse_path)]
    pub state_path: PathBuf,

    /// Directory for persisted state (history, rate limiter). Defaults to
    /// the parent directory of the state document.
    #[clap(long, value_parser = parse_path)]
    pub data_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the offline media bank JSON file.
    #[clap(long, value_parser = parse_path)]
    pub bank_path: Option<PathBuf>,

    /// How often to poll the state document, in seconds.
    #[clap(long, default_value_t = 1)]
    pub poll_interval_secs: u64,

    /// Minimum seconds between reconciliation cycles.
    #[clap(long, default_value_t = 2)]
    pub debounce_secs: u64,

    /// Giphy API key. Without it media search runs from the offline bank.
    #[clap(long)]
    pub giphy_api_key: Option<String>,

    /// Last.fm API key for track tag lookups.
    #[clap(long)]
    pub lastfm_api_key: Option<String>,

    /// Base URL of the video lookup service.
    #[clap(long)]
    pub video_service_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!(
        "Starting deckwatch {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };

    let cli_config = CliConfig {
        state_path: Some(cli_args.state_path),
        data_dir: cli_args.data_dir,
        bank_path: cli_args.bank_path,
        poll_interval_secs: cli_args.poll_interval_secs,
        debounce_secs: cli_args.debounce_secs,
        giphy_api_key: cli_args.giphy_api_key,
        lastfm_api_key: cli_args.lastfm_api_key,
        video_service_url: cli_args.video_service_url,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    let store = Arc::new(FileStateStore::new(config.state_path.clone()));
    let limiter = Arc::new(SlidingWindowLimiter::persisted(
        config.rate_limiter.clone(),
        config.rate_limiter_state_path(),
    ));
    let history = Arc::new(ArtistHistory::persisted(
        config.history_size,
        config.history_state_path(),
    ));

    let bank = Arc::new(match &config.bank_path {
        Some(path) => OfflineMediaBank::load(path),
        None => OfflineMediaBank::from_items(vec![]),
    });

    let media_provider: Option<Arc<dyn MediaProvider>> = match &config.providers.giphy_api_key {
        Some(key) => Some(Arc::new(GiphyClient::new(
            key,
            config.providers.giphy_base_url.as_deref(),
            config.providers.giphy_timeout_sec,
        )?)),
        None => {
            if bank.is_empty() {
                warn!("No media provider configured and the offline bank is empty");
            } else {
                info!("No media provider configured, serving from the offline bank");
            }
            None
        }
    };

    let tag_provider: Option<Arc<dyn TagProvider>> = match &config.providers.lastfm_api_key {
        Some(key) => Some(Arc::new(LastFmTagClient::new(
            key,
            None,
            config.providers.lastfm_max_tags,
        )?)),
        None => None,
    };

    let video_provider: Option<Arc<dyn MediaProvider>> = match &config.providers.video_service_url {
        Some(url) => Some(Arc::new(VideoServiceClient::new(
            url,
            config.providers.video_timeout_sec,
        )?)),
        None => None,
    };

    let cancel = CancellationToken::new();
    let cache = Arc::new(MediaFetchCache::new(
        config.fetch_cache.clone(),
        cancel.child_token(),
    ));

    let orchestrator = EnrichmentOrchestrator::new(
        media_provider,
        tag_provider,
        video_provider,
        bank,
        limiter,
        history,
        Arc::clone(&cache),
        config.enrichment.clone(),
    );

    let reconciler = Reconciler::new(store, orchestrator, cache, config.reconciler.clone());

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    reconciler.run(cancel).await;
    Ok(())
}
