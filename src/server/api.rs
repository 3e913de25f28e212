//! REST API handlers for the pool broker
//!
//! This module defines the API routes and handlers. Every JSON response
//! uses the `{success, data?, error?}` envelope.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BrokerErrorTrait;
use crate::lease::{LeaseGrant, LeaseStats, ReleaseOutcome};
use crate::metrics;
use crate::models::{InstanceRecord, PoolSnapshot, SourceReport};
use crate::pool::CacheStatus;
use crate::utils::error::LeaseError;
use crate::utils::parse_flag;

use super::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Unsuccessful response that still carries a payload
    pub fn failure(data: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(message.into()),
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            category: None,
            retryable: None,
        }
    }

    /// Error response classified by the error's category
    pub fn from_error<E: BrokerErrorTrait>(err: &E) -> Self {
        Self {
            category: Some(err.category().label()),
            retryable: Some(err.is_recoverable()),
            ..Self::new(err.to_string())
        }
    }
}

/// Service information
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub target_total: usize,
    pub refresh_interval_secs: u64,
    pub endpoints: Vec<&'static str>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub cache: CacheStatus,
    pub leases: LeaseStats,
}

/// Snapshot listing
#[derive(Debug, Serialize)]
pub struct ServersResponse {
    pub count: usize,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<InstanceRecord>,
    pub source_report: SourceReport,
}

impl From<&PoolSnapshot> for ServersResponse {
    fn from(snapshot: &PoolSnapshot) -> Self {
        Self {
            count: snapshot.len(),
            generated_at: snapshot.generated_at,
            items: snapshot.items.clone(),
            source_report: snapshot.source_report.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServersQuery {
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaseRequest {
    #[serde(default)]
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<LeaseGrant>,
}

/// Release and confirm request body
#[derive(Debug, Default, Deserialize)]
pub struct InstanceRequest {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub instance_id: String,
    pub status: ReleaseOutcome,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub instance_id: String,
    pub status: &'static str,
}

// ============================================================================
// API Routes
// ============================================================================

const ENDPOINTS: &[&str] = &[
    "GET /api/health",
    "GET /api/servers?refresh=1",
    "POST /api/lease",
    "POST /api/release",
    "POST /api/confirm",
    "GET /metrics",
];

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/api/health", get(health_check))
        .route("/api/servers", get(list_servers))
        .route("/api/lease", post(lease))
        .route("/api/release", post(release))
        .route("/api/confirm", post(confirm))
        .route("/metrics", get(prometheus_metrics))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("not_found"))).into_response()
}

/// Malformed or missing JSON bodies keep axum's status but use the error envelope
fn bad_body(rejection: JsonRejection) -> Response {
    (
        rejection.status(),
        Json(ErrorResponse::new(rejection.body_text())),
    )
        .into_response()
}

// ============================================================================
// Info Handlers
// ============================================================================

async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(ServiceInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        target_total: state.config.pool.target_total,
        refresh_interval_secs: state.config.pool.refresh_interval_secs,
        endpoints: ENDPOINTS.to_vec(),
    }))
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.cache.status().await;
    let leases = state.leases.stats().await;

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache,
        leases,
    }))
}

async fn prometheus_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Pool Handlers
// ============================================================================

/// Current snapshot, optionally forcing a blocking refresh
async fn list_servers(
    State(state): State<AppState>,
    Query(query): Query<ServersQuery>,
) -> Response {
    let force = query.refresh.as_deref().is_some_and(parse_flag);

    match state.cache.get(force).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(ApiResponse::success(ServersResponse::from(snapshot.as_ref()))),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, force, "Snapshot unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse::from_error(&e))).into_response()
        }
    }
}

// ============================================================================
// Lease Handlers
// ============================================================================

async fn lease(
    State(state): State<AppState>,
    body: Result<Json<LeaseRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state.leases.lease(&request.client_id).await {
        Ok(grant) => (
            StatusCode::OK,
            Json(ApiResponse::success(LeaseResponse {
                granted: grant.is_some(),
                lease: grant,
            })),
        )
            .into_response(),
        Err(e) => lease_error(e),
    }
}

async fn release(
    State(state): State<AppState>,
    body: Result<Json<InstanceRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state
        .leases
        .release(&request.instance_id, &request.client_id)
        .await
    {
        Ok(status @ ReleaseOutcome::Released) => (
            StatusCode::OK,
            Json(ApiResponse::success(ReleaseResponse {
                instance_id: request.instance_id,
                status,
            })),
        )
            .into_response(),
        Ok(status @ ReleaseOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::failure(
                ReleaseResponse {
                    instance_id: request.instance_id,
                    status,
                },
                "No active reservation held by this client",
            )),
        )
            .into_response(),
        Err(e) => lease_error(e),
    }
}

async fn confirm(
    State(state): State<AppState>,
    body: Result<Json<InstanceRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state
        .leases
        .confirm(&request.instance_id, &request.client_id)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(ConfirmResponse {
                instance_id: request.instance_id,
                status: "confirmed",
            })),
        )
            .into_response(),
        Err(e) => lease_error(e),
    }
}

fn lease_error(err: LeaseError) -> Response {
    let status = match err {
        LeaseError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LeaseError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ErrorResponse::from_error(&err))).into_response()
}

// ============================================================================
// Tests
// ============================================================================
