//! Page fetching strategies.
//!
//! The pipeline only sees [`PageFetcher`]; which implementation backs it is
//! decided once at startup from [`FetchConfig`].

pub mod browser;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::config::{FetchConfig, FetcherKind};

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("browser could not be started: {0}")]
    Launch(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Returns the rendered document markup for a URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

pub fn from_config(config: &FetchConfig) -> Result<Arc<dyn PageFetcher>, FetchError> {
    let fetcher: Arc<dyn PageFetcher> = match config.kind {
        FetcherKind::Browser => Arc::new(BrowserFetcher::new(config.clone())),
        FetcherKind::Http => Arc::new(HttpFetcher::new(config.timeout)?),
    };
    Ok(fetcher)
}
