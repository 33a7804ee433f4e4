//! Runtime configuration for the fetch pipeline
//!
//! Collects the endpoint, cache location, timeout and pipeline settings, and
//! builds the shared HTTP client and service objects from them.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

use crate::cache::ImageCache;
use crate::data::{RecipeClient, DEFAULT_ENDPOINT};
use crate::fetcher::{FetcherConfig, MalformedPolicy};

/// Default bound on each HTTP call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent with every request
const USER_AGENT: &str = concat!("recipes/", env!("CARGO_PKG_VERSION"));

/// Settings for one run of the application
#[derive(Debug, Clone)]
pub struct Config {
    /// Recipe list endpoint
    pub endpoint: String,
    /// Image cache directory; `None` means the XDG cache directory
    pub cache_dir: Option<PathBuf>,
    /// Timeout applied to every HTTP call
    pub request_timeout: Duration,
    /// Handling of malformed records
    pub malformed_policy: MalformedPolicy,
    /// Upper bound on image downloads running at once
    pub max_concurrent_downloads: usize,
}

impl Default for Config {
    fn default() -> Self {
        let fetcher = FetcherConfig::default();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            cache_dir: None,
            request_timeout: DEFAULT_TIMEOUT,
            malformed_policy: fetcher.malformed_policy,
            max_concurrent_downloads: fetcher.max_concurrent_downloads,
        }
    }
}

impl Config {
    /// Builds the HTTP client shared by the recipe client and image cache
    pub fn http_client(&self) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(self.request_timeout)
            .user_agent(USER_AGENT)
            .build()
    }

    /// Builds the recipe client for the configured endpoint
    pub fn recipe_client(&self, client: Client) -> RecipeClient {
        RecipeClient::new()
            .with_client(client)
            .with_endpoint(self.endpoint.clone())
    }

    /// Builds the image cache in the configured or XDG directory
    ///
    /// Returns `None` only when no directory was given and no home
    /// directory can be determined.
    pub fn image_cache(&self, client: Client) -> Option<ImageCache> {
        let cache = match &self.cache_dir {
            Some(dir) => ImageCache::with_dir(dir.clone()),
            None => ImageCache::new()?,
        };
        Some(cache.with_client(client))
    }

    /// Pipeline settings for the [`Fetcher`](crate::fetcher::Fetcher)
    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            malformed_policy: self.malformed_policy,
            max_concurrent_downloads: self.max_concurrent_downloads,
        }
    }
}
