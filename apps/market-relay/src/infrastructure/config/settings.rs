//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded once at startup from
//! environment variables. There is no runtime reconfiguration.

use std::time::Duration;

use crate::domain::pricing::Symbol;

/// Default market data feed endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://ws.finnhub.io";

/// Default tracked symbols.
pub const DEFAULT_TRACKED_SYMBOLS: &[&str] = &["AAPL", "NVDA"];

/// Default fixed reconnect delay for both upstream links.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Smallest accepted reconnect delay; lower values are raised to this.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Default bound on the feed handshake and subscribe requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a single write to a client socket.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default origins allowed by CORS when no list is configured.
pub const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:5174",
    "http://localhost:3000",
];

/// Market data feed token.
#[derive(Clone)]
pub struct FeedToken(String);

impl FeedToken {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// Get the token value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for FeedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FeedToken([REDACTED])")
    }
}

/// Market data feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Feed WebSocket endpoint (without the token).
    pub url: String,
    /// Pre-shared API token.
    pub token: FeedToken,
    /// Symbols subscribed on every connection.
    pub symbols: Vec<Symbol>,
    /// Fixed delay between a failure and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Bound on the handshake and on sending the subscribe requests.
    pub connect_timeout: Duration,
    /// Reconnect when no frame arrives for this long (`None` = never).
    pub idle_timeout: Option<Duration>,
}

/// Broker credentials.
#[derive(Clone, Default)]
pub enum BrokerCredentials {
    /// Connect anonymously.
    #[default]
    None,
    /// Username and password.
    UserPassword {
        /// Username.
        user: String,
        /// Password.
        password: String,
    },
    /// Shared token.
    Token(String),
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::UserPassword { user, .. } => f
                .debug_struct("UserPassword")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Token(_) => f.write_str("Token([REDACTED])"),
        }
    }
}

/// Message broker settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker server URL.
    pub url: String,
    /// Credentials.
    pub credentials: BrokerCredentials,
    /// Subject to attach to.
    pub subject: String,
    /// Optional queue group; members share delivery of the subject.
    pub queue_group: Option<String>,
    /// Fixed delay between a failure and the next connection attempt.
    pub reconnect_delay: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            credentials: BrokerCredentials::None,
            subject: "notifications.>".to_string(),
            queue_group: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Client-facing session settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Outbound buffer per session; a full buffer counts as a failed send.
    pub buffer_capacity: usize,
    /// Interval between keep-alive pings to each client.
    pub ping_interval: Duration,
    /// A client write that takes longer than this ends the session.
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 1_000,
            ping_interval: Duration::from_secs(30),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Cross-origin policy for browser clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    /// Allow any origin.
    AllowAll,
    /// Allow only these origins.
    Origins(Vec<String>),
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::Origins(DEFAULT_CORS_ORIGINS.iter().map(ToString::to_string).collect())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port for the query endpoint, client WebSocket, health and metrics.
    pub http_port: u16,
    /// Whether to install the Prometheus recorder.
    pub metrics_enabled: bool,
    /// Cross-origin policy.
    pub cors: CorsPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8000,
            metrics_enabled: true,
            cors: CorsPolicy::default(),
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Market data feed settings.
    pub feed: FeedSettings,
    /// Message broker settings.
    pub broker: BrokerSettings,
    /// Client session settings.
    pub sessions: SessionSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// empty, if the symbol list is empty, or if broker credentials are
    /// incomplete.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("FINNHUB_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("FINNHUB_KEY".to_string()))?;
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FINNHUB_KEY".to_string()));
        }

        let symbols = match lookup("TRACKED_SYMBOLS") {
            Some(raw) => parse_symbols(&raw)?,
            None => DEFAULT_TRACKED_SYMBOLS
                .iter()
                .map(|s| Symbol::new(s))
                .collect(),
        };

        let idle_secs = parse_u64(&lookup, "FEED_IDLE_TIMEOUT_SECS", 90);
        let feed = FeedSettings {
            url: lookup("FEED_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            token: FeedToken::new(token.trim().to_string()),
            symbols,
            reconnect_delay: parse_millis(
                &lookup,
                "FEED_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY,
            )
            .max(MIN_RECONNECT_DELAY),
            connect_timeout: parse_secs(
                &lookup,
                "FEED_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT,
            )
            .max(Duration::from_secs(1)),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        };

        let broker_defaults = BrokerSettings::default();
        let broker = BrokerSettings {
            url: lookup("NATS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(broker_defaults.url),
            credentials: parse_broker_credentials(&lookup)?,
            subject: lookup("BROKER_SUBJECT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(broker_defaults.subject),
            queue_group: lookup("BROKER_QUEUE_GROUP").filter(|v| !v.trim().is_empty()),
            reconnect_delay: parse_millis(
                &lookup,
                "BROKER_RECONNECT_DELAY_MS",
                broker_defaults.reconnect_delay,
            )
            .max(MIN_RECONNECT_DELAY),
        };

        let session_defaults = SessionSettings::default();
        let sessions = SessionSettings {
            buffer_capacity: parse_usize(
                &lookup,
                "CLIENT_BUFFER_CAPACITY",
                session_defaults.buffer_capacity,
            )
            .max(1),
            ping_interval: parse_secs(
                &lookup,
                "CLIENT_PING_INTERVAL_SECS",
                session_defaults.ping_interval,
            ),
            write_timeout: parse_secs(
                &lookup,
                "CLIENT_WRITE_TIMEOUT_SECS",
                session_defaults.write_timeout,
            )
            .max(Duration::from_secs(1)),
        };

        let server_defaults = ServerSettings::default();
        let allow_all = lookup("ALLOW_ALL_ORIGINS").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let cors = if allow_all {
            CorsPolicy::AllowAll
        } else {
            lookup("CORS_ORIGINS")
                .map(|raw| CorsPolicy::Origins(split_list(&raw)))
                .unwrap_or_default()
        };
        let server = ServerSettings {
            http_port: parse_u16(&lookup, "RELAY_HTTP_PORT", server_defaults.http_port),
            metrics_enabled: lookup("RELAY_METRICS_ENABLED")
                .map_or(server_defaults.metrics_enabled, |v| {
                    !v.eq_ignore_ascii_case("false")
                }),
            cors,
        };

        Ok(Self {
            feed,
            broker,
            sessions,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Parse a comma-separated symbol list into unique upper-case symbols.
///
/// # Errors
///
/// Returns an error if no symbol remains after trimming.
pub fn parse_symbols(raw: &str) -> Result<Vec<Symbol>, ConfigError> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for symbol in raw.split(',').map(Symbol::new) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "TRACKED_SYMBOLS".to_string(),
            reason: "no symbols listed".to_string(),
        });
    }

    Ok(symbols)
}

fn parse_broker_credentials<F>(lookup: &F) -> Result<BrokerCredentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let user = lookup("NATS_USER").filter(|v| !v.is_empty());
    let password = lookup("NATS_PASSWORD").filter(|v| !v.is_empty());
    let token = lookup("NATS_TOKEN").filter(|v| !v.is_empty());

    match (user, password, token) {
        (Some(user), Some(password), _) => Ok(BrokerCredentials::UserPassword { user, password }),
        (Some(_), None, _) => Err(ConfigError::MissingEnvVar("NATS_PASSWORD".to_string())),
        (None, Some(_), _) => Err(ConfigError::MissingEnvVar("NATS_USER".to_string())),
        (None, None, Some(token)) => Ok(BrokerCredentials::Token(token)),
        (None, None, None) => Ok(BrokerCredentials::None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_u16<F>(lookup: &F, key: &str, default: u16) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_usize<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
