//! HTTP fetcher for upstream listing pages
//!
//! This module provides the HTTP [`PageSource`] with features including:
//! - Per-request timeout
//! - Rate limiting with governor
//! - Status classification into retryable and fatal failures
//! - Cursor-based page addressing

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT},
    Client, StatusCode,
};
use std::num::NonZeroU32;
use std::time::Duration;
use url::Url;

use super::PageSource;
use crate::config::{Config, SourceConfig};
use crate::models::UpstreamPage;
use crate::utils::error::FetchError;

/// HTTP listing fetcher for a single upstream source
pub struct ListingFetcher {
    /// Source name for reports
    name: String,

    /// Fully resolved listing URL
    endpoint: Url,

    /// HTTP client with configured timeout and compression
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Entries requested per page
    page_size: u32,

    /// Default request headers
    headers: HeaderMap,
}

impl ListingFetcher {
    /// Create a fetcher for one source
    ///
    /// # Arguments
    ///
    /// * `name` - Source name used in reports
    /// * `base_url` - Source base URL
    /// * `listing_path` - Path appended to the base URL (e.g. `/servers`)
    /// * `timeout` - Request timeout duration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::InvalidUrl` for an unparsable URL and
    /// `FetchError::Http` if the HTTP client cannot be created
    pub fn new(
        name: &str,
        base_url: &str,
        listing_path: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let endpoint = Self::build_endpoint(base_url, listing_path)?;

        let client = Client::builder().timeout(timeout).gzip(true).build()?;

        Ok(Self {
            name: name.to_string(),
            endpoint,
            client,
            rate_limiter: Self::rate_limiter(10),
            page_size: 100,
            headers: Self::build_headers(concat!("poolbroker/", env!("CARGO_PKG_VERSION"))),
        })
    }

    /// Create a fetcher from a source entry and the upstream settings
    ///
    /// # Errors
    ///
    /// Returns `FetchError` if the URL or the client is invalid
    pub fn from_config(source: &SourceConfig, config: &Config) -> Result<Self, FetchError> {
        Ok(Self::new(
            &source.name,
            &source.url,
            &config.upstream.listing_path,
            config.request_timeout(),
        )?
        .with_page_size(config.upstream.page_size)
        .with_rate_limit(config.upstream.requests_per_second)
        .with_user_agent(&config.upstream.user_agent))
    }

    /// Set the page size requested upstream
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the maximum requests per second
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.rate_limiter = Self::rate_limiter(requests_per_second);
        self
    }

    fn rate_limiter(requests_per_second: u32) -> RateLimiter<NotKeyed, InMemoryState, DefaultClock> {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_second(rate))
    }

    /// Set the user agent header
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.headers = Self::build_headers(user_agent);
        self
    }

    /// Listing URL this fetcher requests
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Join base URL and listing path, keeping any path on the base
    fn build_endpoint(base_url: &str, listing_path: &str) -> Result<Url, FetchError> {
        let joined = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            listing_path.trim_start_matches('/')
        );
        let joined = joined.trim_end_matches('/');

        Url::parse(joined).map_err(|e| FetchError::InvalidUrl(format!("{joined}: {e}")))
    }

    /// Build HTTP headers for listing requests
    fn build_headers(user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }

        headers
    }

    /// Query parameters for one page request
    fn query_params(&self, cursor: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("limit", self.page_size.to_string()),
            ("sortOrder", String::from("Asc")),
            ("excludeFullGames", String::from("true")),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        params
    }

    /// Map a non-success status to a fetch error
    fn classify_status(status: StatusCode) -> FetchError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            FetchError::RateLimit
        } else {
            FetchError::Status(status.as_u16())
        }
    }
}

#[async_trait]
impl PageSource for ListingFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<UpstreamPage, FetchError> {
        self.rate_limiter.until_ready().await;

        tracing::trace!(source = %self.name, url = %self.endpoint, cursor = ?cursor, "Fetching page");

        let response = self
            .client
            .get(self.endpoint.clone())
            .headers(self.headers.clone())
            .query(&self.query_params(cursor))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else if e.is_connect() {
                    FetchError::Connect(e.to_string())
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e)
            }
        })?;

        serde_json::from_slice::<UpstreamPage>(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}
