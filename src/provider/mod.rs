//! External content providers and the offline fallback bank.
//!
//! Everything here sits behind small traits so the orchestrator and the
//! tests never depend on a live service. All provider failures are typed and
//! recoverable; the reconciliation loop degrades to the offline bank instead
//! of propagating them.

mod bank;
mod giphy;
mod tags;
mod video;

pub use bank::OfflineMediaBank;
pub use giphy::GiphyClient;
pub use tags::{LastFmTagClient, TagProvider};
pub use video::VideoServiceClient;

use crate::state_store::MediaItem;
use async_trait::async_trait;

/// Error surface of every external provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {0}")]
    Status(u16),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// A media search service. One rate-limiter unit per call, regardless of
/// `pool_size`.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn search(&self, query: &str, pool_size: usize)
        -> Result<Vec<MediaItem>, ProviderError>;
}
