use crate::config::Config;
use crate::ratings::RatingsStore;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tmdb_transport::TmdbClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Upstream client carrying the server's API key
    pub tmdb: TmdbClient,

    /// Persistent per-user ratings (trait object for flexibility)
    pub ratings: Arc<dyn RatingsStore>,
}

impl AppState {
    /// Create new application state with configured HTTP client and store
    pub fn new(config: &Config, ratings: Arc<dyn RatingsStore>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            // Covers the whole exchange, image bodies included
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(10)
            .build()?;

        let tmdb = TmdbClient::new(client, config.endpoints.clone(), config.api_key.clone());

        Ok(Self { tmdb, ratings })
    }
}
