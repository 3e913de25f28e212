//! Configuration management for the pool broker
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upstream listing sources and request policy
    pub upstream: UpstreamConfig,

    /// Aggregation and refresh policy
    pub pool: PoolConfig,

    /// Reservation and visited-mark policy
    pub lease: LeaseConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// A single upstream listing source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name used in reports and logs
    pub name: String,

    /// Base URL; the listing path is appended to it
    pub url: String,
}

/// Upstream request configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Sources to aggregate
    pub sources: Vec<SourceConfig>,

    /// Path appended to every source URL
    pub listing_path: String,

    /// Entries requested per page
    pub page_size: u32,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Pause between successful page fetches in milliseconds
    pub page_delay_ms: u64,

    /// Request quota per source (requests per second)
    pub requests_per_second: u32,

    /// User agent string
    pub user_agent: String,

    /// Retries per page after the first attempt
    pub max_retries: u32,

    /// Backoff base delay in milliseconds
    pub retry_base_delay_ms: u64,

    /// Backoff cap in milliseconds
    pub retry_max_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            listing_path: String::from("/servers"),
            page_size: 100,
            request_timeout_ms: 12_000,
            page_delay_ms: 200,
            requests_per_second: 10,
            user_agent: format!("poolbroker/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 5,
            retry_base_delay_ms: 2000,
            retry_max_delay_ms: 8000,
        }
    }
}

/// Aggregation and cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Page cap per source per refresh
    pub pages_per_source: u32,

    /// Item cap per source (defaults to `target_total`)
    pub items_per_source: Option<usize>,

    /// Snapshot size after truncation
    pub target_total: usize,

    /// Background refresh interval in seconds
    pub refresh_interval_secs: u64,

    /// Age after which a snapshot is stale, in seconds
    pub cache_ttl_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pages_per_source: 5,
            items_per_source: None,
            target_total: 500,
            refresh_interval_secs: 900,
            cache_ttl_secs: 1350,
        }
    }
}

/// Lease table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Reservation lifetime in seconds
    pub reservation_ttl_secs: u64,

    /// Visited-mark lifetime in seconds
    pub visited_ttl_secs: u64,

    /// Background sweep interval in seconds
    pub sweep_interval_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 60,
            visited_ttl_secs: 900,
            sweep_interval_secs: 30,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse a `name=url,name=url` source list
///
/// Entries without a `name=` prefix are named `source-<index>`.
pub fn parse_sources(raw: &str) -> Vec<SourceConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(index, entry)| match entry.split_once('=') {
            Some((name, url)) if !name.contains("://") => SourceConfig {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            },
            _ => SourceConfig {
                name: format!("source-{index}"),
                url: entry.to_string(),
            },
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let sources = std::env::var("POOLBROKER_SOURCES")
            .map(|raw| parse_sources(&raw))
            .unwrap_or_default();

        let upstream = UpstreamConfig {
            sources,
            listing_path: std::env::var("POOLBROKER_LISTING_PATH")
                .unwrap_or(defaults.upstream.listing_path),
            page_size: env_or("POOLBROKER_PAGE_SIZE", defaults.upstream.page_size),
            request_timeout_ms: env_or(
                "POOLBROKER_REQUEST_TIMEOUT_MS",
                defaults.upstream.request_timeout_ms,
            ),
            page_delay_ms: env_or("POOLBROKER_PAGE_DELAY_MS", defaults.upstream.page_delay_ms),
            requests_per_second: env_or(
                "POOLBROKER_REQUESTS_PER_SECOND",
                defaults.upstream.requests_per_second,
            ),
            user_agent: std::env::var("POOLBROKER_USER_AGENT")
                .unwrap_or(defaults.upstream.user_agent),
            max_retries: env_or("POOLBROKER_MAX_RETRIES", defaults.upstream.max_retries),
            retry_base_delay_ms: env_or(
                "POOLBROKER_RETRY_BASE_DELAY_MS",
                defaults.upstream.retry_base_delay_ms,
            ),
            retry_max_delay_ms: env_or(
                "POOLBROKER_RETRY_MAX_DELAY_MS",
                defaults.upstream.retry_max_delay_ms,
            ),
        };

        let pool = PoolConfig {
            pages_per_source: env_or("POOLBROKER_PAGES_PER_SOURCE", defaults.pool.pages_per_source),
            items_per_source: std::env::var("POOLBROKER_ITEMS_PER_SOURCE")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            target_total: env_or("POOLBROKER_TARGET_TOTAL", defaults.pool.target_total),
            refresh_interval_secs: env_or(
                "POOLBROKER_REFRESH_INTERVAL_SECS",
                defaults.pool.refresh_interval_secs,
            ),
            cache_ttl_secs: env_or("POOLBROKER_CACHE_TTL_SECS", defaults.pool.cache_ttl_secs),
        };

        let lease = LeaseConfig {
            reservation_ttl_secs: env_or(
                "POOLBROKER_RESERVATION_TTL_SECS",
                defaults.lease.reservation_ttl_secs,
            ),
            visited_ttl_secs: env_or("POOLBROKER_VISITED_TTL_SECS", defaults.lease.visited_ttl_secs),
            sweep_interval_secs: env_or(
                "POOLBROKER_SWEEP_INTERVAL_SECS",
                defaults.lease.sweep_interval_secs,
            ),
        };

        let bind_address = match std::env::var("POOLBROKER_BIND_ADDRESS") {
            Ok(addr) => addr
                .parse()
                .with_context(|| format!("Invalid POOLBROKER_BIND_ADDRESS: {addr}"))?,
            Err(_) => match std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
                Some(port) => SocketAddr::from(([0, 0, 0, 0], port)),
                None => defaults.server.bind_address,
            },
        };

        let server = ServerConfig {
            bind_address,
            enable_cors: env_or("POOLBROKER_ENABLE_CORS", defaults.server.enable_cors),
            enable_request_logging: env_or(
                "POOLBROKER_REQUEST_LOGGING",
                defaults.server.enable_request_logging,
            ),
        };

        let logging = LoggingConfig {
            level: std::env::var("POOLBROKER_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("POOLBROKER_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            upstream,
            pool,
            lease,
            server,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.upstream.sources.is_empty() {
            anyhow::bail!("at least one upstream source is required");
        }

        let mut names = HashSet::new();
        for source in &self.upstream.sources {
            if source.name.trim().is_empty() {
                anyhow::bail!("source name must not be empty ({})", source.url);
            }
            if !names.insert(source.name.as_str()) {
                anyhow::bail!("duplicate source name: {}", source.name);
            }
            let url = Url::parse(&source.url)
                .with_context(|| format!("Invalid URL for source '{}'", source.name))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("source '{}' must use http or https", source.name);
            }
        }

        if self.upstream.page_size == 0 {
            anyhow::bail!("page_size must be greater than 0");
        }

        if self.upstream.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be greater than 0");
        }

        if self.upstream.requests_per_second == 0 {
            anyhow::bail!("requests_per_second must be greater than 0");
        }

        if self.upstream.retry_max_delay_ms < self.upstream.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms must not be below retry_base_delay_ms");
        }

        if self.pool.pages_per_source == 0 {
            anyhow::bail!("pages_per_source must be greater than 0");
        }

        if self.pool.target_total == 0 {
            anyhow::bail!("target_total must be greater than 0");
        }

        if self.pool.items_per_source == Some(0) {
            anyhow::bail!("items_per_source must be greater than 0");
        }

        if self.pool.cache_ttl_secs == 0 || self.pool.refresh_interval_secs == 0 {
            anyhow::bail!("cache_ttl_secs and refresh_interval_secs must be greater than 0");
        }

        if self.lease.reservation_ttl_secs == 0 || self.lease.visited_ttl_secs == 0 {
            anyhow::bail!("reservation and visited TTLs must be greater than 0");
        }

        if self.lease.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than 0");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.request_timeout_ms)
    }

    /// Get inter-page delay as Duration
    #[must_use]
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.upstream.page_delay_ms)
    }

    /// Retry policy for page fetches
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_delays(
            self.upstream.max_retries,
            self.upstream.retry_base_delay_ms,
            self.upstream.retry_max_delay_ms,
        )
    }

    /// Per-source item cap
    #[must_use]
    pub fn items_per_source(&self) -> usize {
        self.pool.items_per_source.unwrap_or(self.pool.target_total)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.pool.cache_ttl_secs)
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.pool.refresh_interval_secs)
    }

    #[must_use]
    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.lease.reservation_ttl_secs)
    }

    #[must_use]
    pub fn visited_ttl(&self) -> Duration {
        Duration::from_secs(self.lease.visited_ttl_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.lease.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_source() -> Config {
        let mut config = Config::default();
        config.upstream.sources = vec![SourceConfig {
            name: "main".into(),
            url: "https://games.example.com/v1/games/1".into(),
        }];
        config
    }

    #[test]
    fn test_default_config_requires_sources() {
        assert!(Config::default().validate().is_err());
        assert!(config_with_source().validate().is_ok());
    }

    #[test]
    fn test_duplicate_source_names() {
        let mut config = config_with_source();
        config.upstream.sources.push(SourceConfig {
            name: "main".into(),
            url: "https://other.example.com".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_source_url() {
        let mut config = config_with_source();
        config.upstream.sources[0].url = "ftp://example.com".into();
        assert!(config.validate().is_err());

        config.upstream.sources[0].url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_retry_delays() {
        let mut config = config_with_source();
        config.upstream.retry_base_delay_ms = 5000;
        config.upstream.retry_max_delay_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_target_total() {
        let mut config = config_with_source();
        config.pool.target_total = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_sources() {
        let sources = parse_sources("eu=https://eu.example.com, https://us.example.com ,");
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "eu");
        assert_eq!(sources[0].url, "https://eu.example.com");
        assert_eq!(sources[1].name, "source-1");
        assert_eq!(sources[1].url, "https://us.example.com");
    }

    #[test]
    fn test_parse_sources_url_with_query() {
        let sources = parse_sources("https://example.com/list?region=eu");
        assert_eq!(sources[0].name, "source-0");
        assert_eq!(sources[0].url, "https://example.com/list?region=eu");
    }

    #[test]
    fn test_duration_conversions() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(12));
        assert_eq!(config.page_delay(), Duration::from_millis(200));
        assert_eq!(config.cache_ttl(), Duration::from_secs(1350));
        assert_eq!(config.items_per_source(), 500);
        assert_eq!(config.retry_config(), RetryConfig::with_delays(5, 2000, 8000));
    }
}
