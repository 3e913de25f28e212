//! HTTP server for the pool broker
//!
//! This module wires the refresh cache and lease manager behind an axum
//! router and runs the periodic refresh and sweep tasks.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lease::{LeaseManager, LeaseSettings};
use crate::metrics;
use crate::pool::{Aggregator, CacheSettings, RefreshCache};

pub use api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Snapshot cache
    pub cache: RefreshCache,

    /// Lease manager
    pub leases: Arc<LeaseManager>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Build state around an existing lease manager
    pub fn new(leases: Arc<LeaseManager>, config: Config) -> Self {
        Self {
            cache: leases.cache().clone(),
            leases,
            start_time: Instant::now(),
            config: Arc::new(config),
        }
    }
}

// ============================================================================
// Broker Server
// ============================================================================

/// Main broker server
pub struct BrokerServer {
    config: Config,
    state: AppState,
}

impl BrokerServer {
    /// Create a new server from configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let aggregator = Aggregator::from_config(&config)?;
        let cache = RefreshCache::new(Arc::new(aggregator), CacheSettings::from_config(&config));
        let leases = Arc::new(LeaseManager::new(cache, LeaseSettings::from_config(&config)));

        Ok(Self::with_state(AppState::new(leases, config)))
    }

    /// Create a server around prepared state
    pub fn with_state(state: AppState) -> Self {
        Self {
            config: state.config.as_ref().clone(),
            state,
        }
    }

    /// Override the bind address
    #[must_use]
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.server.bind_address = addr;
        self
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router =
            create_router(self.state.clone()).layer(middleware::from_fn(track_requests));

        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.build_router();
        let addr = self.config.server.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::with_source(format!("Failed to bind {addr}"), e))?;

        tracing::info!(%addr, sources = self.config.upstream.sources.len(), "Pool broker listening");

        let tasks = self.start_background_tasks();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(Error::from);

        for task in tasks {
            task.abort();
        }

        tracing::info!("Pool broker shutdown complete");
        served
    }

    /// Warm-up refresh plus periodic refresh and sweep tasks
    fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let cache = self.state.cache.clone();
        let warm_up = tokio::spawn(async move {
            tracing::info!("Starting warm-up refresh");
            cache.refresh_in_background().await;
        });

        let refresher = self
            .state
            .cache
            .start_refresher(self.config.refresh_interval());
        let sweeper = Arc::clone(&self.state.leases).start_sweeper(self.config.sweep_interval());

        tracing::info!(
            refresh_interval_secs = self.config.pool.refresh_interval_secs,
            sweep_interval_secs = self.config.lease.sweep_interval_secs,
            "Background tasks started"
        );

        vec![warm_up, refresher, sweeper]
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.server.bind_address,
            sources: self.config.upstream.sources.len(),
            target_total: self.config.pool.target_total,
            cors_enabled: self.config.server.enable_cors,
            request_logging_enabled: self.config.server.enable_request_logging,
        }
    }
}

/// Count requests and latency per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub sources: usize,
    pub target_total: usize,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Pool Broker\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Sources: {}\n\
             Target Size: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.sources,
            self.target_total,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
