//! Client for The Movie Database (TMDb) REST API and image CDN.
//!
//! Every metadata request carries the server-held API key. Caller supplied
//! query parameters are merged first and the key is set last, so a caller
//! can never override it. The key never leaves this crate in cleartext
//! except on the wire: logged URLs go through [`redacted`] and
//! `reqwest` errors are stripped of their URL before they are surfaced.

use std::fmt;

use reqwest::{Client, Response, StatusCode, Url};
use thiserror::Error;
use tracing::{debug_span, Instrument};

pub const API_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p";
pub const DEFAULT_IMAGE_SIZE: &str = "w500";

/// Query parameter the upstream expects the API key under
pub const API_KEY_PARAM: &str = "api_key";

/// Poster/backdrop variants served by the image CDN
pub const IMAGE_SIZES: &[&str] = &["w92", "w154", "w185", "w342", "w500", "w780", "original"];

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("invalid upstream path: {0}")]
    InvalidPath(String),

    #[error("unknown image size: {0}")]
    InvalidSize(String),

    #[error("upstream request timed out: {0}")]
    Timeout(reqwest::Error),

    #[error("failed to reach upstream: {0}")]
    Network(reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(StatusCode),

    #[error("upstream returned malformed JSON: {0}")]
    MalformedBody(#[source] serde_json::Error),
}

impl UpstreamError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        // the request URL carries the api key
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Network(err)
        }
    }

    /// True when the request was rejected before any outbound call
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidPath(_) | Self::InvalidSize(_))
    }
}

/// Server-held TMDb credential. `Debug` never prints the value.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Upstream locations. Defaults point at the public TMDb hosts.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: Url,
    pub image_base: Url,
    pub image_size: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: Url::parse(API_BASE_URL).expect("API_BASE_URL is a valid URL"),
            image_base: Url::parse(IMAGE_BASE_URL).expect("IMAGE_BASE_URL is a valid URL"),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct TmdbClient {
    client: Client,
    endpoints: Endpoints,
    api_key: ApiKey,
}

impl TmdbClient {
    pub fn new(client: Client, endpoints: Endpoints, api_key: ApiKey) -> Self {
        Self {
            client,
            endpoints,
            api_key,
        }
    }

    /// Build the upstream URL for a metadata endpoint such as `/movie/popular`.
    pub fn metadata_url(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Url, UpstreamError> {
        validate_path(endpoint)?;
        let mut url = join(&self.endpoints.api_base, endpoint)?;

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (key, value) in params.iter().filter(|(key, _)| key != API_KEY_PARAM) {
                query.append_pair(key, value);
            }
            // set after the merge so the server's key always wins
            query.append_pair(API_KEY_PARAM, self.api_key.expose());
        }

        Ok(url)
    }

    /// Build the CDN URL for an image path such as `/abc.jpg`.
    pub fn image_url(&self, path: &str, size: Option<&str>) -> Result<Url, UpstreamError> {
        validate_path(path)?;
        let size = size.unwrap_or(&self.endpoints.image_size);
        if !IMAGE_SIZES.contains(&size) {
            return Err(UpstreamError::InvalidSize(size.to_string()));
        }
        join(&self.endpoints.image_base, &format!("/{size}{path}"))
    }

    /// Call a metadata endpoint and decode the JSON body.
    ///
    /// The status is checked before the body is read: a non-success status
    /// is an error even if the upstream attached a JSON explanation.
    pub async fn fetch_metadata(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, UpstreamError> {
        let url = self.metadata_url(endpoint, params)?;
        let span = debug_span!("tmdb_metadata", url = %redacted(&url));

        async move {
            tracing::debug!("Relaying metadata request");

            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(UpstreamError::from_reqwest)?;

            let status = resp.status();
            if !status.is_success() {
                tracing::warn!(status = %status, "Upstream returned non-success status");
                return Err(UpstreamError::Status(status));
            }

            let body = resp.bytes().await.map_err(UpstreamError::from_reqwest)?;
            tracing::debug!(response_size = body.len(), "Metadata received");

            serde_json::from_slice(&body).map_err(UpstreamError::MalformedBody)
        }
        .instrument(span)
        .await
    }

    /// Request an image and hand back the live response so the body can be
    /// streamed. Only successful responses are returned.
    pub async fn fetch_image(
        &self,
        path: &str,
        size: Option<&str>,
    ) -> Result<Response, UpstreamError> {
        let url = self.image_url(path, size)?;
        let span = debug_span!("tmdb_image", url = %url);

        async move {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(UpstreamError::from_reqwest)?;

            let status = resp.status();
            if !status.is_success() {
                tracing::warn!(status = %status, "Image upstream returned non-success status");
                return Err(UpstreamError::Status(status));
            }

            Ok(resp)
        }
        .instrument(span)
        .await
    }
}

/// Copy of `url` with the API key value masked, for logging.
pub fn redacted(url: &Url) -> Url {
    let mut out = url.clone();
    if url.query().is_none() {
        return out;
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == API_KEY_PARAM {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    out.query_pairs_mut().clear().extend_pairs(pairs);
    out
}

fn validate_path(path: &str) -> Result<(), UpstreamError> {
    if !path.starts_with('/') {
        return Err(UpstreamError::InvalidPath("path must start with '/'".into()));
    }
    if path.contains(['?', '#', '\\']) {
        return Err(UpstreamError::InvalidPath(
            "path must not contain '?', '#' or '\\'".into(),
        ));
    }
    // the URL parser also resolves percent-encoded dots
    let dot_segment = path.split('/').any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    });
    if dot_segment {
        return Err(UpstreamError::InvalidPath(
            "path must not contain dot segments".into(),
        ));
    }
    Ok(())
}

fn join(base: &Url, path: &str) -> Result<Url, UpstreamError> {
    let raw = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    let url = Url::parse(&raw).map_err(|e| UpstreamError::InvalidPath(e.to_string()))?;

    if url.host_str() != base.host_str() || url.port_or_known_default() != base.port_or_known_default() {
        return Err(UpstreamError::InvalidPath("path escapes the upstream host".into()));
    }

    Ok(url)
}
