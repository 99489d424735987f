//! Port Interfaces
//!
//! Defines the interfaces (ports) between the data plane and the outside
//! world. Infrastructure adapters implement these.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MessageSource`: a broker subscription yielding opaque messages
//!
//! ## Supervised Work
//!
//! - `BackgroundLoop`: a long-lived loop owned by the startup supervisor

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Broker Port
// =============================================================================

/// One message delivered by the broker.
///
/// The payload is opaque and forwarded to clients unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Routing subject or topic the message arrived on, if any.
    pub subject: Option<String>,
    /// Raw message body.
    pub payload: Bytes,
}

impl BrokerMessage {
    /// Create a message with no routing metadata.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            subject: None,
            payload: payload.into(),
        }
    }

    /// Attach the subject the message arrived on.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Stream of messages from one broker connection.
///
/// The stream ending means the subscription was lost.
pub type BrokerStream = BoxStream<'static, BrokerMessage>;

/// Errors raised while attaching to the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Could not connect to the broker.
    #[error("broker connection failed: {0}")]
    ConnectionFailed(String),

    /// Connected, but the subscription was rejected.
    #[error("broker subscription failed: {0}")]
    SubscribeFailed(String),

    /// The subscription stream ended.
    #[error("broker subscription ended")]
    StreamEnded,
}

/// A broker subscription that can be (re)opened on demand.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Open a fresh connection and attach the configured subscription.
    async fn subscribe(&self) -> Result<BrokerStream, BrokerError>;

    /// Endpoint description for logs. Must not include credentials.
    fn describe(&self) -> String;
}

// =============================================================================
// Background Loop Port
// =============================================================================

/// A loop that runs for the life of the process until cancelled.
///
/// Implementations handle their own retries; `run` returns only when
/// `cancel` fires.
#[async_trait]
pub trait BackgroundLoop: Send + Sync {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Run until cancelled.
    async fn run(&self, cancel: CancellationToken);
}
