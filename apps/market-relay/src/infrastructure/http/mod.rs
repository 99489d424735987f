//! HTTP Server
//!
//! One axum server carries every client-facing surface of the relay.
//!
//! # Endpoints
//!
//! - `GET /stocks/{symbol}` - Last cached price for a symbol
//! - `GET /ws` - Client WebSocket (broker fan-out)
//! - `GET /health`, `/healthz`, `/readyz`, `/metrics` - see [`health`](crate::infrastructure::health)

pub mod session;
pub mod stocks;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::domain::pricing::SharedPriceCache;
use crate::infrastructure::broadcast::SharedClientRegistry;
use crate::infrastructure::config::CorsPolicy;
use crate::infrastructure::health::{self, HealthState};

pub use session::outbound_message;
pub use stocks::PriceResponse;

// =============================================================================
// Router
// =============================================================================

/// State shared by the price query and session handlers.
#[derive(Debug)]
pub struct RelayState {
    /// Latest prices, read-only here.
    pub cache: SharedPriceCache,
    /// Client session registry.
    pub registry: SharedClientRegistry,
    /// Interval between keep-alive pings to each client.
    pub ping_interval: Duration,
    /// Longest a single client write may take before the session is closed.
    pub write_timeout: Duration,
}

/// Build the full application router.
pub fn build_router(state: Arc<RelayState>, health: Arc<HealthState>, cors: &CorsPolicy) -> Router {
    Router::new()
        .route("/stocks/{symbol}", get(stocks::price_handler))
        .route("/ws", get(session::ws_handler))
        .with_state(state)
        .merge(health::router(health))
        .layer(cors_layer(cors))
}

fn cors_layer(policy: &CorsPolicy) -> CorsLayer {
    match policy {
        CorsPolicy::AllowAll => CorsLayer::permissive(),
        CorsPolicy::Origins(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Relay HTTP server.
pub struct HttpServer {
    port: u16,
    app: Router,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, app: Router, cancel: CancellationToken) -> Self {
        Self { port, app, cancel }
    }

    /// Bind all interfaces and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");
        serve(listener, self.app, self.cancel).await
    }
}

/// Serve `app` on an already-bound listener until cancelled.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), HttpServerError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
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
