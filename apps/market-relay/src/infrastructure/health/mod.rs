//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, relay statistics, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks upstream feeds)
//! - `GET /stats` - Client and subscription counts
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::RelayService;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::upstream::{ConnectionState, UpstreamStats};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feeds: FeedsStatus,
    /// Connected downstream clients.
    pub clients: usize,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both feeds open.
    Healthy,
    /// One feed open.
    Degraded,
    /// No feed open.
    Unhealthy,
}

/// Upstream feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedsStatus {
    /// Equities feed.
    pub equities: FeedInfo,
    /// Options feed.
    pub options: FeedInfo,
}

/// Individual feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: String,
    /// Whether the transport is open.
    pub connected: bool,
    /// Frames received.
    pub frames_received: u64,
    /// Ticks emitted.
    pub ticks_emitted: u64,
    /// Reconnect attempts over the process lifetime.
    pub reconnect_attempts: u64,
    /// Last successful open.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last connection error.
    pub last_error: Option<String>,
}

impl From<UpstreamStats> for FeedInfo {
    fn from(stats: UpstreamStats) -> Self {
        Self {
            state: stats.state.as_str().to_string(),
            connected: stats.state.is_open(),
            frames_received: stats.frames_received,
            ticks_emitted: stats.ticks_emitted,
            reconnect_attempts: stats.reconnect_attempts,
            last_connected_at: stats.last_connected_at,
            last_error: stats.last_error,
        }
    }
}

/// Registry sizes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriptionStatus {
    /// Distinct tickers subscribed upstream.
    pub symbols: usize,
    /// Distinct option contracts subscribed upstream.
    pub contracts: usize,
    /// Keys with a cached last price.
    pub cached_prices: usize,
}

/// `GET /stats` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Connected downstream clients.
    pub clients: usize,
    /// Distinct tickers subscribed upstream.
    pub symbols: usize,
    /// Distinct option contracts subscribed upstream.
    pub contracts: usize,
    /// Whether the equities transport is open.
    pub equities_connected: bool,
    /// Whether the options transport is open.
    pub options_connected: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Read-only view of one upstream feed.
pub trait FeedStatusSource: Send + Sync {
    /// Point-in-time feed statistics.
    fn feed_stats(&self) -> UpstreamStats;
}

impl FeedStatusSource for crate::infrastructure::upstream::UpstreamConnector {
    fn feed_stats(&self) -> UpstreamStats {
        self.stats()
    }
}

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    relay: Arc<RelayService>,
    equities: Arc<dyn FeedStatusSource>,
    options: Arc<dyn FeedStatusSource>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        relay: Arc<RelayService>,
        equities: Arc<dyn FeedStatusSource>,
        options: Arc<dyn FeedStatusSource>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            relay,
            equities,
            options,
        }
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// Health Server
// =============================================================================

/// Serve the health endpoints on an already bound listener until cancelled.
///
/// # Errors
///
/// Returns `HealthServerError::ServerFailed` if the HTTP server encounters
/// a fatal error while running.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
) -> Result<(), HealthServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Health server listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

    tracing::info!("Health server stopped");
    Ok(())
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
    let is_ready = state.equities.feed_stats().state.is_open()
        || state.options.feed_stats().state.is_open();

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn stats_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(build_stats_response(&state))
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
    let equities = FeedInfo::from(state.equities.feed_stats());
    let options = FeedInfo::from(state.options.feed_stats());
    let status = determine_health_status(&equities, &options);
    let relay = state.relay.stats();

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feeds: FeedsStatus { equities, options },
        clients: relay.clients,
        subscriptions: SubscriptionStatus {
            symbols: relay.subscriptions.equities.key_count,
            contracts: relay.subscriptions.options.key_count,
            cached_prices: relay.cached_prices,
        },
    }
}

fn build_stats_response(state: &HealthServerState) -> StatsResponse {
    let relay = state.relay.stats();
    StatsResponse {
        clients: relay.clients,
        symbols: relay.subscriptions.equities.key_count,
        contracts: relay.subscriptions.options.key_count,
        equities_connected: state.equities.feed_stats().state.is_open(),
        options_connected: state.options.feed_stats().state.is_open(),
    }
}

fn determine_health_status(equities: &FeedInfo, options: &FeedInfo) -> HealthStatus {
    match (equities.connected, options.connected) {
        (true, true) => HealthStatus::Healthy,
        (true, false) | (false, true) => HealthStatus::Degraded,
        (false, false) => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::MockUpstreamControl;
    use crate::application::services::RelayLimits;
    use crate::domain::subscription::{Feed, SubscriptionRegistry};

    struct FixedFeed(Feed, ConnectionState);

    impl FeedStatusSource for FixedFeed {
        fn feed_stats(&self) -> UpstreamStats {
            UpstreamStats {
                feed: self.0,
                state: self.1,
                frames_received: 7,
                ticks_emitted: 5,
                reconnect_attempts: 0,
                last_connected_at: None,
                last_error: None,
            }
        }
    }

    fn state(equities: ConnectionState, options: ConnectionState) -> Arc<HealthServerState> {
        let quiet = || {
            let mut mock = MockUpstreamControl::new();
            mock.expect_subscribe().return_const(());
            mock.expect_unsubscribe().return_const(());
            Arc::new(mock)
        };
        let relay = Arc::new(RelayService::new(
            Arc::new(SubscriptionRegistry::new()),
            quiet(),
            quiet(),
            RelayLimits::default(),
        ));
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            relay,
            Arc::new(FixedFeed(Feed::Equities, equities)),
            Arc::new(FixedFeed(Feed::Options, options)),
        ))
    }

    async fn get(state: Arc<HealthServerState>, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn info(connected: bool) -> FeedInfo {
        FeedInfo {
            state: if connected { "authenticated" } else { "disconnected" }.to_string(),
            connected,
            frames_received: 0,
            ticks_emitted: 0,
            reconnect_attempts: 0,
            last_connected_at: None,
            last_error: None,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn status_follows_open_feed_count() {
        assert_eq!(
            determine_health_status(&info(true), &info(true)),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&info(false), &info(true)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&info(false), &info(false)),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn health_endpoint_reports_degraded_with_one_feed() {
        let (status, body) = get(
            state(ConnectionState::Authenticated, ConnectionState::Connecting),
            "/health",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["feeds"]["equities"]["state"], "authenticated");
        assert_eq!(json["feeds"]["options"]["connected"], false);
    }

    #[tokio::test]
    async fn health_endpoint_is_unavailable_with_no_feed() {
        let (status, _) = get(
            state(ConnectionState::GaveUp, ConnectionState::AuthFailed),
            "/health",
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readiness_needs_one_open_feed() {
        let (ready, _) = get(
            state(ConnectionState::Disconnected, ConnectionState::Connected),
            "/readyz",
        )
        .await;
        let (not_ready, body) = get(
            state(ConnectionState::Disconnected, ConnectionState::Disconnected),
            "/readyz",
        )
        .await;

        assert_eq!(ready, StatusCode::OK);
        assert_eq!(not_ready, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");
    }

    #[tokio::test]
    async fn stats_endpoint_uses_camel_case() {
        let (status, body) = get(
            state(ConnectionState::Authenticated, ConnectionState::Disconnected),
            "/stats",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["clients"], 0);
        assert_eq!(json["symbols"], 0);
        assert_eq!(json["contracts"], 0);
        assert_eq!(json["equitiesConnected"], true);
        assert_eq!(json["optionsConnected"], false);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (status, body) = get(
            state(ConnectionState::Stopped, ConnectionState::Stopped),
            "/healthz",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
