//! Pool aggregation and snapshot caching
//!
//! - [`aggregator`] - concurrent crawl of all sources, merged into one list
//! - [`cache`] - TTL snapshot cache with singleflight refresh

pub mod aggregator;
pub mod cache;

pub use aggregator::{merge_records, Aggregator, Collection};
pub use cache::{CacheSettings, CacheStatus, RefreshCache, RefreshResult};
