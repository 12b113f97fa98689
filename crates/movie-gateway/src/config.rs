use reqwest::Url;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tmdb_transport::{ApiKey, Endpoints, IMAGE_SIZES};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings loaded from config.toml. Every field is optional.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TomlConfig {
    port: u16,
    ratings_path: PathBuf,
    api_base_url: String,
    image_base_url: String,
    image_size: String,
    request_timeout_secs: u64,
    connect_timeout_secs: u64,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            ratings_path: PathBuf::from("ratings.json"),
            api_base_url: tmdb_transport::API_BASE_URL.to_string(),
            image_base_url: tmdb_transport::IMAGE_BASE_URL.to_string(),
            image_size: tmdb_transport::DEFAULT_IMAGE_SIZE.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Complete application configuration
#[derive(Clone)]
pub struct Config {
    /// TMDb credential, injected into every metadata request
    pub api_key: ApiKey,

    /// Port to bind the server to
    pub port: u16,

    /// JSON file backing the ratings store
    pub ratings_path: PathBuf,

    /// Upstream API and image CDN locations
    pub endpoints: Endpoints,

    /// Whole-request timeout for upstream calls, in seconds
    pub request_timeout_secs: u64,

    /// Connect timeout for upstream calls, in seconds
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key)
            .field("port", &self.port)
            .field("ratings_path", &self.ratings_path)
            .field("api_base_url", &self.endpoints.api_base.as_str())
            .field("image_base_url", &self.endpoints.image_base.as_str())
            .field("image_size", &self.endpoints.image_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Load configuration from .env, the environment and config.toml
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file (secrets)
        dotenvy::dotenv().ok();

        let api_key = env::var("TMDB_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("TMDB_API_KEY".to_string()))?;

        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        let mut toml_config = Self::load_toml(&config_path)?;

        if let Ok(port) = env::var("PORT") {
            toml_config.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a valid port: {port}")))?;
        }
        if let Ok(path) = env::var("RATINGS_PATH") {
            toml_config.ratings_path = PathBuf::from(path);
        }

        Self::from_parts(ApiKey::new(api_key.trim()), toml_config)
    }

    /// Parse and validate settings; a missing file yields the defaults.
    fn load_toml(path: &str) -> Result<TomlConfig, ConfigError> {
        let path = Path::new(path);
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(TomlConfig::default());
        }
        let contents = fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    fn from_parts(api_key: ApiKey, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        if toml_config.request_timeout_secs == 0 || toml_config.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".to_string()));
        }

        if !IMAGE_SIZES.contains(&toml_config.image_size.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "image_size must be one of {}",
                IMAGE_SIZES.join(", ")
            )));
        }

        let endpoints = Endpoints {
            api_base: parse_base_url("api_base_url", &toml_config.api_base_url)?,
            image_base: parse_base_url("image_base_url", &toml_config.image_base_url)?,
            image_size: toml_config.image_size,
        };

        Ok(Config {
            api_key,
            port: toml_config.port,
            ratings_path: toml_config.ratings_path,
            endpoints,
            request_timeout_secs: toml_config.request_timeout_secs,
            connect_timeout_secs: toml_config.connect_timeout_secs,
        })
    }
}

fn parse_base_url(name: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid(format!("{name}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::Invalid(format!("{name} must be an http(s) URL")));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ConfigError::Invalid(format!(
            "{name} must not carry a query or fragment"
        )));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(contents: &str) -> Result<Config, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let toml_config = Config::load_toml(file.path().to_str().unwrap())?;
        Config::from_parts(ApiKey::new("hunter2"), toml_config)
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let toml_config = Config::load_toml("/nonexistent/movie-gateway/config.toml").unwrap();
        let config = Config::from_parts(ApiKey::new("secret"), toml_config).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.ratings_path, PathBuf::from("ratings.json"));
        assert_eq!(config.endpoints.api_base.as_str(), "https://api.themoviedb.org/3");
        assert_eq!(config.endpoints.image_size, "w500");
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let config = parse("port = 8080\nratings_path = \"/var/lib/movies/ratings.json\"\nimage_size = \"w342\"\n").unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.ratings_path, PathBuf::from("/var/lib/movies/ratings.json"));
        assert_eq!(config.endpoints.image_size, "w342");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(parse("request_timeout_secs = 0\n"), Err(ConfigError::Invalid(_))));
        assert!(matches!(parse("image_size = \"huge\"\n"), Err(ConfigError::Invalid(_))));
        assert!(matches!(parse("api_base_url = \"ftp://example.com\"\n"), Err(ConfigError::Invalid(_))));
        assert!(matches!(parse("unknown_field = 1\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = parse("").unwrap();
        let shown = format!("{config:?}");

        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("ApiKey(***)"));
    }
}
