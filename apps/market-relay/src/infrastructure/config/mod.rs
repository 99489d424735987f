//! Configuration Module
//!
//! Environment-driven configuration for the relay, read once at startup.

mod settings;

pub use settings::{
    BrokerCredentials, BrokerSettings, ConfigError, CorsPolicy, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_CORS_ORIGINS, DEFAULT_FEED_URL, DEFAULT_RECONNECT_DELAY, DEFAULT_TRACKED_SYMBOLS,
    DEFAULT_WRITE_TIMEOUT, MIN_RECONNECT_DELAY, FeedSettings, FeedToken,
    RelayConfig, ServerSettings, SessionSettings, parse_symbols,
};
