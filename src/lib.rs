//! poolbroker - Federated instance pool aggregator with exclusive leasing
//!
//! Crawls one or more paginated upstream listings, merges them into a
//! bounded, deduplicated, randomized snapshot and hands out exclusive,
//! TTL-bounded leases on individual instances.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - Upstream HTTP client and cursor paginator
//! - [`pool`] - Multi-source aggregation and the singleflight snapshot cache
//! - [`lease`] - Reservation and visited-mark bookkeeping
//! - [`server`] - HTTP API
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Retry policy, domain errors and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use poolbroker::config::Config;
//! use poolbroker::lease::{LeaseManager, LeaseSettings};
//! use poolbroker::pool::{Aggregator, CacheSettings, RefreshCache};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!
//!     let aggregator = Arc::new(Aggregator::from_config(&config)?);
//!     let cache = RefreshCache::new(aggregator, CacheSettings::from_config(&config));
//!     let leases = LeaseManager::new(cache, LeaseSettings::from_config(&config));
//!
//!     if let Some(grant) = leases.lease("client-1").await? {
//!         println!("leased {}", grant.instance.id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod lease;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod server;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{ListingFetcher, PageSource, Paginator};
    pub use crate::error::{BrokerErrorTrait, Error, ErrorCategory, Result};
    pub use crate::lease::{LeaseGrant, LeaseManager, LeaseSettings, ReleaseOutcome};
    pub use crate::models::{InstanceRecord, PoolSnapshot, SourceReport};
    pub use crate::pool::{Aggregator, CacheSettings, RefreshCache};
}

// Direct re-exports for convenience
pub use models::{InstanceRecord, PoolSnapshot};
