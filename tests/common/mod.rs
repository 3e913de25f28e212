//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use poolbroker::crawler::{PageSource, Paginator};
use poolbroker::lease::{LeaseManager, LeaseSettings};
use poolbroker::models::{UpstreamPage, UpstreamServer};
use poolbroker::pool::{Aggregator, CacheSettings, RefreshCache};
use poolbroker::utils::error::FetchError;
use poolbroker::utils::retry::RetryConfig;

/// Upstream entry with free capacity
pub fn server(id: &str, capacity: i64, occupancy: i64) -> UpstreamServer {
    UpstreamServer {
        id: Some(id.to_string()),
        max_players: Some(capacity),
        playing: Some(occupancy),
        ..Default::default()
    }
}

/// JSON body of one upstream page with `count` entries `prefix-<start..>`
pub fn page_body(prefix: &str, start: usize, count: usize, next: Option<&str>) -> serde_json::Value {
    let data: Vec<_> = (start..start + count)
        .map(|i| serde_json::json!({"id": format!("{prefix}-{i}"), "maxPlayers": 10, "playing": 3}))
        .collect();
    serde_json::json!({"data": data, "nextPageCursor": next})
}

/// In-process source serving a fixed list of entries as one page
pub struct MemorySource {
    name: String,
    entries: Vec<UpstreamServer>,
    delay: Duration,
    pub calls: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
}

impl MemorySource {
    pub fn new(name: &str, entries: Vec<UpstreamServer>) -> Self {
        Self {
            name: name.to_string(),
            entries,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Source with `ids` as free instances
    pub fn with_ids(name: &str, ids: &[&str]) -> Self {
        Self::new(name, ids.iter().map(|id| server(id, 8, 1)).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, _cursor: Option<&str>) -> Result<UpstreamPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Status(400));
        }
        Ok(UpstreamPage {
            data: self.entries.clone(),
            next_page_cursor: None,
        })
    }
}

/// Paginator without delays or retries
pub fn fast_paginator() -> Paginator {
    Paginator::new(RetryConfig::with_delays(0, 1, 1), Duration::ZERO)
}

pub fn aggregator(sources: Vec<Arc<dyn PageSource>>) -> Arc<Aggregator> {
    Arc::new(Aggregator::new(sources, fast_paginator()))
}

pub fn cache(sources: Vec<Arc<dyn PageSource>>, ttl: Duration, target_total: usize) -> RefreshCache {
    RefreshCache::new(
        aggregator(sources),
        CacheSettings {
            ttl,
            pages_per_source: 1,
            target_total,
        },
    )
}

pub fn lease_manager(
    sources: Vec<Arc<dyn PageSource>>,
    reservation_ttl: Duration,
    visited_ttl: Duration,
) -> LeaseManager {
    LeaseManager::new(
        cache(sources, Duration::from_secs(60), 500),
        LeaseSettings {
            reservation_ttl,
            visited_ttl,
        },
    )
}
