#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Relay - Real-Time Data Plane
//!
//! Keeps one live subscription to a third-party market data feed, caching
//! the latest price per tracked symbol for the query endpoint, and one live
//! subscription to a message broker, fanning every message out to the
//! connected WebSocket clients.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core data-plane types
//!   - `pricing`: Symbols, ticks and the latest-price cache
//!   - `streaming`: Upstream link state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Broker message source, background loop
//!   - `services`: Startup supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Market data WebSocket client
//!   - `broker`: NATS subscription and fan-out bridge
//!   - `broadcast`: Client session registry
//!   - `http`: Price query endpoint and client WebSocket
//!   - `config`: Environment configuration
//!   - `health`: Health check endpoints
//!
//! # Data Flow
//!
//! ```text
//! Feed WS ──► FeedIngester ──► PriceCache ──► GET /stocks/{symbol}
//!
//! Broker  ──► BrokerBridge ──► ClientRegistry ──► Client 1
//!                                              ├─► Client 2
//!                                              └─► Client N
//! ```
//!
//! The two pipelines share no state. `StartupSupervisor` launches both
//! loops and is the only component that touches both.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core data-plane types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::pricing::{PriceCache, PriceTick, SharedPriceCache, Symbol};
pub use domain::streaming::{LinkKind, LinkState, LinkStatus, SharedLinkStatus};

// Ports and services
pub use application::ports::{
    BackgroundLoop, BrokerError, BrokerMessage, BrokerStream, MessageSource,
};
pub use application::services::{StartupSupervisor, SupervisorHandle};

// Infrastructure config
pub use infrastructure::config::{
    BrokerCredentials, BrokerSettings, ConfigError, CorsPolicy, FeedSettings, FeedToken,
    RelayConfig, ServerSettings, SessionSettings,
};

// Upstream loops
pub use infrastructure::broker::{BrokerBridge, NatsSource};
pub use infrastructure::feed::{FeedError, FeedIngester};

// Client sessions
pub use infrastructure::broadcast::{
    BroadcastReport, ClientRegistry, ClientSession, SessionId, SharedClientRegistry,
};

// HTTP server
pub use infrastructure::health::HealthState;
pub use infrastructure::http::{HttpServer, HttpServerError, RelayState, build_router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
