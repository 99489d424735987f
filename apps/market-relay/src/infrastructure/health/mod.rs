//! Health Check and Metrics Endpoints
//!
//! Reports upstream link status and relay statistics, and exposes
//! Prometheus metrics. Mounted on the relay's HTTP server.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (at least one link streaming)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::pricing::SharedPriceCache;
use crate::domain::streaming::{LinkState, LinkStatus, SharedLinkStatus};
use crate::infrastructure::broadcast::SharedClientRegistry;
use crate::infrastructure::metrics::get_metrics_handle;

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
    /// Upstream link status.
    pub links: LinksStatus,
    /// Connected client sessions.
    pub sessions: usize,
    /// Tracked symbols with a known price.
    pub cached_symbols: usize,
    /// Tracked symbols in total.
    pub tracked_symbols: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both links streaming.
    Healthy,
    /// One link streaming.
    Degraded,
    /// No link streaming.
    Unhealthy,
}

/// Status of both upstream links.
#[derive(Debug, Clone, Serialize)]
pub struct LinksStatus {
    /// Market data feed.
    pub feed: LinkInfo,
    /// Message broker.
    pub broker: LinkInfo,
}

/// Individual link status.
#[derive(Debug, Clone, Serialize)]
pub struct LinkInfo {
    /// Connection state.
    pub state: LinkState,
    /// Whether this link is streaming.
    pub connected: bool,
    /// Messages received count.
    pub messages_received: u64,
    /// Consecutive reconnect attempts (0 while streaming).
    pub reconnect_attempts: u64,
    /// When the link last reached streaming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent failure since the last successful connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&LinkStatus> for LinkInfo {
    fn from(status: &LinkStatus) -> Self {
        Self {
            state: status.state(),
            connected: status.is_streaming(),
            messages_received: status.messages_received(),
            reconnect_attempts: status.reconnect_attempts(),
            last_connected_at: status.last_connected_at(),
            last_error: status.last_error(),
        }
    }
}

// =============================================================================
// Health State
// =============================================================================

/// Shared state for the health endpoints.
#[derive(Debug)]
pub struct HealthState {
    version: String,
    started_at: Instant,
    feed: SharedLinkStatus,
    broker: SharedLinkStatus,
    registry: SharedClientRegistry,
    cache: SharedPriceCache,
}

impl HealthState {
    /// Create new health state.
    #[must_use]
    pub fn new(
        version: String,
        feed: SharedLinkStatus,
        broker: SharedLinkStatus,
        registry: SharedClientRegistry,
        cache: SharedPriceCache,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            broker,
            registry,
            cache,
        }
    }

    /// Build the current health report.
    #[must_use]
    pub fn report(&self) -> HealthResponse {
        let feed = LinkInfo::from(self.feed.as_ref());
        let broker = LinkInfo::from(self.broker.as_ref());
        let status = determine_health_status(&feed, &broker);

        HealthResponse {
            status,
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            links: LinksStatus { feed, broker },
            sessions: self.registry.session_count(),
            cached_symbols: self.cache.known_count(),
            tracked_symbols: self.cache.tracked().len(),
        }
    }

    /// Check whether at least one link is streaming.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.feed.is_streaming() || self.broker.is_streaming()
    }
}

/// Build the health and metrics routes.
pub fn router(state: Arc<HealthState>) -> Router {
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

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = state.report();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
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

fn determine_health_status(feed: &LinkInfo, broker: &LinkInfo) -> HealthStatus {
    match (feed.connected, broker.connected) {
        (true, true) => HealthStatus::Healthy,
        (true, false) | (false, true) => HealthStatus::Degraded,
        (false, false) => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::pricing::{PriceCache, Symbol};
    use crate::domain::streaming::LinkKind;
    use crate::infrastructure::broadcast::ClientRegistry;

    fn info(connected: bool) -> LinkInfo {
        LinkInfo {
            state: if connected {
                LinkState::Streaming
            } else {
                LinkState::Backoff
            },
            connected,
            messages_received: 0,
            reconnect_attempts: u64::from(!connected),
            last_connected_at: None,
            last_error: None,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_by_connected_links() {
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

    #[test]
    fn report_reflects_shared_state() {
        let feed = Arc::new(LinkStatus::new(LinkKind::Feed));
        let broker = Arc::new(LinkStatus::new(LinkKind::Broker));
        let registry = Arc::new(ClientRegistry::new(4));
        let cache = Arc::new(PriceCache::new([Symbol::new("AAPL"), Symbol::new("NVDA")]));

        let state = HealthState::new(
            "1.2.3".to_string(),
            Arc::clone(&feed),
            Arc::clone(&broker),
            Arc::clone(&registry),
            Arc::clone(&cache),
        );
        assert!(!state.is_ready());

        feed.set_state(LinkState::Streaming);
        broker.record_failure("connection refused".to_string());
        cache.set(Symbol::new("AAPL"), Decimal::new(1502, 1));
        // Untracked prices never count as cached.
        cache.set(Symbol::new("MSFT"), Decimal::new(410, 0));
        cache.set(Symbol::new("TSLA"), Decimal::new(250, 0));
        let (_session, _rx) = registry.open_session();

        let report = state.report();
        assert!(state.is_ready());
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.version, "1.2.3");
        assert_eq!(report.sessions, 1);
        assert_eq!(report.cached_symbols, 1);
        assert_eq!(report.tracked_symbols, 2);
        assert_eq!(report.links.broker.reconnect_attempts, 1);
        assert_eq!(
            report.links.broker.last_error.as_deref(),
            Some("connection refused")
        );
    }
}
