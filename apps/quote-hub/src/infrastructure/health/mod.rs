//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, source status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (running with at least one streaming source)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    HubStats, MarketDataService, ServiceState, SourceState, SourceStatus,
};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Service lifecycle state.
    pub service: ServiceState,
    /// Per-source status.
    pub sources: Vec<SourceStatus>,
    /// Hub statistics.
    pub stats: HubStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All sources streaming.
    Healthy,
    /// Some sources streaming.
    Degraded,
    /// No source streaming or the service is not running.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    service: Arc<MarketDataService>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, service: Arc<MarketDataService>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            service,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let sources = state.service.source_statuses();
    if is_ready(state.service.state(), &sources) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let service = state.service.state();
    let sources = state.service.source_statuses();

    HealthResponse {
        status: determine_health_status(service, &sources),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        service,
        stats: state.service.stats(),
        sources,
    }
}

fn streaming_count(sources: &[SourceStatus]) -> usize {
    sources
        .iter()
        .filter(|s| s.state == SourceState::Streaming)
        .count()
}

fn determine_health_status(service: ServiceState, sources: &[SourceStatus]) -> HealthStatus {
    if service != ServiceState::Running {
        return HealthStatus::Unhealthy;
    }

    match streaming_count(sources) {
        0 => HealthStatus::Unhealthy,
        n if n == sources.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

fn is_ready(service: ServiceState, sources: &[SourceStatus]) -> bool {
    service == ServiceState::Running && streaming_count(sources) > 0
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::channel::ChannelSource;

    fn source(state: SourceState) -> SourceStatus {
        SourceStatus {
            name: "feed".to_string(),
            state,
            connected_at: None,
            last_error: None,
            records_ingested: 0,
            ingress_dropped: 0,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_all_streaming() {
        let sources = [source(SourceState::Streaming), source(SourceState::Streaming)];
        assert_eq!(
            determine_health_status(ServiceState::Running, &sources),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn determine_status_partial() {
        let sources = [source(SourceState::Streaming), source(SourceState::Exhausted)];
        assert_eq!(
            determine_health_status(ServiceState::Running, &sources),
            HealthStatus::Degraded
        );
        assert!(is_ready(ServiceState::Running, &sources));
    }

    #[test]
    fn determine_status_none_streaming() {
        let sources = [source(SourceState::Exhausted)];
        assert_eq!(
            determine_health_status(ServiceState::Running, &sources),
            HealthStatus::Unhealthy
        );
        assert!(!is_ready(ServiceState::Running, &sources));
    }

    #[test]
    fn determine_status_not_running() {
        let sources = [source(SourceState::Streaming)];
        assert_eq!(
            determine_health_status(ServiceState::Stopped, &sources),
            HealthStatus::Unhealthy
        );
        assert!(!is_ready(ServiceState::Created, &sources));
    }

    #[tokio::test]
    async fn readiness_follows_service_lifecycle() {
        let service = Arc::new(MarketDataService::default());
        let (feed, _publisher) = ChannelSource::new(8);
        service.add_source("feed", Arc::new(feed)).unwrap();
        let state = Arc::new(HealthServerState::new("test".to_string(), Arc::clone(&service)));

        let request = || Request::builder().uri("/readyz").body(Body::empty()).unwrap();

        let response = router(Arc::clone(&state)).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        service.start().await.unwrap();
        let response = router(Arc::clone(&state)).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        service.stop().await;
        let response = router(state).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_sources() {
        let service = Arc::new(MarketDataService::default());
        let (feed, _publisher) = ChannelSource::new(8);
        service.add_source("feed", Arc::new(feed)).unwrap();
        service.start().await.unwrap();
        let state = Arc::new(HealthServerState::new("1.2.3".to_string(), Arc::clone(&service)));

        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "1.2.3");
        assert_eq!(json["service"], "running");
        assert_eq!(json["sources"][0]["name"], "feed");

        service.stop().await;
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let state = Arc::new(HealthServerState::new(
            "test".to_string(),
            Arc::new(MarketDataService::default()),
        ));

        let response = router(state)
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
