//! Error classification for the poolbroker crate
//!
//! [`BrokerErrorTrait`] classifies every domain error by recoverability and
//! [`ErrorCategory`]; the HTTP layer reports both in error responses.
//! [`Error`] is what server construction and startup return.
//!
//! ```rust,ignore
//! use poolbroker::error::BrokerErrorTrait;
//!
//! if let Err(e) = cache.get(false).await {
//!     tracing::warn!(category = e.category().label(), retryable = e.is_recoverable(), "{e}");
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::utils::error::{FetchError, LeaseError, PoolError, UpstreamError};

/// Common trait for all poolbroker error types
pub trait BrokerErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Upstream transport and status errors
    Network,
    /// Snapshot production errors
    Pool,
    /// Lease request errors
    Lease,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in logs and API errors
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Pool => "pool",
            Self::Lease => "lease",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl BrokerErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        self.is_retryable()
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidUrl(_) => ErrorCategory::Config,
            _ => ErrorCategory::Network,
        }
    }
}

impl BrokerErrorTrait for UpstreamError {
    fn is_recoverable(&self) -> bool {
        self.retries_exhausted
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

impl BrokerErrorTrait for PoolError {
    /// A refresh with no retryable source failure will fail the same way again.
    fn is_recoverable(&self) -> bool {
        match self {
            Self::AllSourcesUnavailable { failures } => failures.iter().any(|f| f.is_recoverable()),
            Self::RefreshAborted => true,
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Pool
    }
}

impl BrokerErrorTrait for LeaseError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidRequest(_) => false,
            Self::Pool(e) => e.is_recoverable(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest(_) => ErrorCategory::Lease,
            Self::Pool(_) => ErrorCategory::Pool,
        }
    }
}

/// Unified error type for the poolbroker crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Snapshot could not be produced
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BrokerErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Pool(e) => e.is_recoverable(),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(e) => e.category(),
            Self::Pool(_) => ErrorCategory::Pool,
            Self::Config(_) => ErrorCategory::Config,
            Self::Io(_) | Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Validation failures from [`crate::config::Config`] arrive as `anyhow` errors
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
