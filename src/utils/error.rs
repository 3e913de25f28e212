//! Error types for the pool broker
//!
//! This module defines the domain errors raised by the upstream client,
//! the aggregator, the refresh cache and the lease manager.

use thiserror::Error;

/// Errors that can occur while fetching a single upstream page
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Could not connect to the upstream
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Non-success status code
    #[error("Upstream returned status {0}")]
    Status(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Response body could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether the same page request should be attempted again
    ///
    /// Retry on 429, any 5xx, timeouts and connection failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit | Self::Timeout | Self::Connect(_) => true,
            Self::Status(code) => *code >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }

    /// HTTP status associated with the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimit => Some(429),
            Self::Status(code) => Some(*code),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// A single source failed to produce its listing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Source '{source_name}' failed on page {page}: {reason}")]
pub struct UpstreamError {
    /// Name of the failing source
    pub source_name: String,

    /// Last HTTP status observed, if the failure carried one
    pub last_status: Option<u16>,

    /// One-based page number that failed
    pub page: u32,

    /// Whether the retry ceiling was reached
    pub retries_exhausted: bool,

    /// Human readable cause
    pub reason: String,
}

impl UpstreamError {
    /// Build from the last fetch error observed for a page
    pub fn from_fetch(source_name: &str, page: u32, err: &FetchError) -> Self {
        Self {
            source_name: source_name.to_string(),
            last_status: err.status(),
            page,
            retries_exhausted: err.is_retryable(),
            reason: err.to_string(),
        }
    }
}

/// Errors produced while building a pool snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every configured source failed during a refresh
    #[error("All {} upstream sources are unavailable", failures.len())]
    AllSourcesUnavailable { failures: Vec<UpstreamError> },

    /// The in-flight refresh ended without producing a result
    #[error("Refresh aborted before completion")]
    RefreshAborted,
}

/// Errors returned by the lease manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    /// Missing or empty identifiers
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No snapshot could be produced to lease from
    #[error("Pool unavailable: {0}")]
    Pool(#[from] PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::RateLimit.is_retryable());
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Status(500).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Connect("refused".into()).is_retryable());

        assert!(!FetchError::Status(400).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Decode("bad json".into()).is_retryable());
    }

    #[test]
    fn test_fetch_error_status() {
        assert_eq!(FetchError::RateLimit.status(), Some(429));
        assert_eq!(FetchError::Status(502).status(), Some(502));
        assert_eq!(FetchError::Timeout.status(), None);
    }

    #[test]
    fn test_upstream_error_from_fetch() {
        let err = UpstreamError::from_fetch("eu", 3, &FetchError::Status(503));
        assert_eq!(err.source_name, "eu");
        assert_eq!(err.last_status, Some(503));
        assert_eq!(err.page, 3);
        assert!(err.retries_exhausted);

        let err = UpstreamError::from_fetch("eu", 1, &FetchError::Status(404));
        assert!(!err.retries_exhausted);
    }

    #[test]
    fn test_all_sources_unavailable_message() {
        let err = PoolError::AllSourcesUnavailable {
            failures: vec![
                UpstreamError::from_fetch("a", 1, &FetchError::Timeout),
                UpstreamError::from_fetch("b", 1, &FetchError::Timeout),
            ],
        };
        assert_eq!(err.to_string(), "All 2 upstream sources are unavailable");
    }
}
