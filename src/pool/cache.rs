//! Snapshot cache with TTL staleness and singleflight refresh
//!
//! At most one aggregation runs at a time. Callers that need a blocking
//! refresh while one is in flight join its waiter list and receive the
//! same result. Stale snapshots are served immediately while a background
//! refresh runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

use super::aggregator::Aggregator;
use crate::config::Config;
use crate::metrics;
use crate::models::PoolSnapshot;
use crate::utils::error::PoolError;

/// Outcome shared with every waiter of a refresh
pub type RefreshResult = Result<Arc<PoolSnapshot>, PoolError>;

/// Refresh parameters
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Snapshot age after which it is stale
    pub ttl: Duration,

    /// Page cap per source
    pub pages_per_source: u32,

    /// Snapshot size
    pub target_total: usize,
}

impl CacheSettings {
    /// Build settings from application configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.cache_ttl(),
            pages_per_source: config.pool.pages_per_source,
            target_total: config.pool.target_total,
        }
    }
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<PoolSnapshot>>,

    /// `Some` while a refresh runs; holds the callers waiting on it
    in_flight: Option<Vec<oneshot::Sender<RefreshResult>>>,

    refresh_count: u64,
    last_error: Option<String>,
}

struct CacheInner {
    aggregator: Arc<Aggregator>,
    settings: CacheSettings,
    state: Mutex<CacheState>,
}

/// Cache status for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub has_snapshot: bool,
    pub generated_at: Option<DateTime<Utc>>,
    pub age_secs: Option<u64>,
    pub is_stale: bool,
    pub refreshing: bool,
    pub size: usize,
    pub refresh_count: u64,
    pub last_error: Option<String>,
}

/// Singleflight snapshot cache
#[derive(Clone)]
pub struct RefreshCache {
    inner: Arc<CacheInner>,
}

impl RefreshCache {
    /// Create an empty cache over an aggregator
    pub fn new(aggregator: Arc<Aggregator>, settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                aggregator,
                settings,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Get the current snapshot
    ///
    /// A fresh snapshot is returned as is. A stale snapshot is returned
    /// immediately and a background refresh is triggered. With
    /// `force_refresh`, or when no snapshot exists, the call waits for the
    /// in-flight refresh (starting one if needed).
    ///
    /// # Errors
    ///
    /// Returns the refresh failure when the caller had to wait for it
    pub async fn get(&self, force_refresh: bool) -> RefreshResult {
        let waiter = {
            let mut state = self.inner.state.lock().await;

            if !force_refresh {
                if let Some(snapshot) = state.snapshot.as_ref().map(Arc::clone) {
                    if snapshot.is_stale(self.inner.settings.ttl) {
                        tracing::debug!(
                            age_secs = snapshot.age().as_secs(),
                            "Serving stale snapshot, refreshing in background"
                        );
                        self.start_refresh(&mut state, None);
                    }
                    return Ok(snapshot);
                }
            }

            let (tx, rx) = oneshot::channel();
            self.start_refresh(&mut state, Some(tx));
            rx
        };

        waiter.await.unwrap_or(Err(PoolError::RefreshAborted))
    }

    /// Trigger a refresh without waiting for it
    ///
    /// Does nothing when a refresh is already in flight. Failures are
    /// logged and the previous snapshot is kept.
    pub async fn refresh_in_background(&self) {
        let mut state = self.inner.state.lock().await;
        self.start_refresh(&mut state, None);
    }

    /// Current snapshot without triggering any refresh
    pub async fn peek(&self) -> Option<Arc<PoolSnapshot>> {
        self.inner.state.lock().await.snapshot.clone()
    }

    /// Cache status for health reporting
    pub async fn status(&self) -> CacheStatus {
        let state = self.inner.state.lock().await;
        let snapshot = state.snapshot.as_ref();

        CacheStatus {
            has_snapshot: snapshot.is_some(),
            generated_at: snapshot.map(|s| s.generated_at),
            age_secs: snapshot.map(|s| s.age().as_secs()),
            is_stale: snapshot.map_or(true, |s| s.is_stale(self.inner.settings.ttl)),
            refreshing: state.in_flight.is_some(),
            size: snapshot.map_or(0, |s| s.len()),
            refresh_count: state.refresh_count,
            last_error: state.last_error.clone(),
        }
    }

    /// Start background task to periodically refresh the snapshot
    ///
    /// The first tick fires one `interval` after start; pair with
    /// [`refresh_in_background`](Self::refresh_in_background) for warm-up.
    pub fn start_refresher(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                cache.refresh_in_background().await;
            }
        })
    }

    /// Join the in-flight refresh or start a new one
    fn start_refresh(
        &self,
        state: &mut CacheState,
        waiter: Option<oneshot::Sender<RefreshResult>>,
    ) {
        match state.in_flight.as_mut() {
            Some(waiters) => {
                tracing::debug!(waiting = waiters.len() + 1, "Joining in-flight refresh");
                waiters.extend(waiter);
            }
            None => {
                state.in_flight = Some(waiter.into_iter().collect());
                let inner = Arc::clone(&self.inner);
                tokio::spawn(inner.run_refresh());
            }
        }
    }
}

impl CacheInner {
    /// Run one aggregation and broadcast its outcome to every waiter
    async fn run_refresh(self: Arc<Self>) {
        let started = Instant::now();
        let aggregator = Arc::clone(&self.aggregator);
        let pages = self.settings.pages_per_source;
        let target = self.settings.target_total;

        // A panicking collect must still release the waiters.
        let result: RefreshResult =
            match tokio::spawn(async move { aggregator.collect(pages, target).await }).await {
                Ok(Ok(collection)) => Ok(Arc::new(PoolSnapshot::new(collection.items, collection.report))),
                Ok(Err(e)) => Err(e),
                Err(join_error) => {
                    tracing::error!(error = %join_error, "Refresh task aborted");
                    Err(PoolError::RefreshAborted)
                }
            };

        metrics::record_refresh(result.is_ok(), started.elapsed().as_secs_f64());

        let waiters = {
            let mut state = self.state.lock().await;
            state.refresh_count += 1;
            match &result {
                Ok(snapshot) => {
                    metrics::set_snapshot_size(snapshot.len());
                    state.snapshot = Some(Arc::clone(snapshot));
                    state.last_error = None;
                }
                Err(e) => {
                    state.last_error = Some(e.to_string());
                }
            }
            state.in_flight.take().unwrap_or_default()
        };

        match &result {
            Ok(snapshot) => tracing::info!(
                size = snapshot.len(),
                failed_sources = snapshot.failed_sources(),
                waiters = waiters.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Snapshot refreshed"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                waiters = waiters.len(),
                "Refresh failed, keeping previous snapshot"
            ),
        }

        for waiter in waiters {
            // A waiter that stopped listening simply drops the result.
            let _ = waiter.send(result.clone());
        }
    }
}
