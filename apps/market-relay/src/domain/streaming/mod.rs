//! Upstream Link State
//!
//! Both upstream links (the market data feed and the message broker) run
//! the same connection state machine:
//!
//! ```text
//! CONNECTING ──► STREAMING ──(error)──► BACKOFF ──(delay)──► CONNECTING
//! ```
//!
//! `LinkStatus` records where a link currently is so the health endpoint
//! can report it. Updates come from the link's own task; reads come from
//! request handlers.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Connection state of an upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Opening the connection and attaching subscriptions.
    #[default]
    Connecting,
    /// Connected and receiving messages.
    Streaming,
    /// Waiting out the fixed reconnect delay.
    Backoff,
    /// The link's task has exited (shutdown).
    Stopped,
}

impl LinkState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Streaming => 1,
            Self::Backoff => 2,
            Self::Stopped => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Streaming,
            2 => Self::Backoff,
            3 => Self::Stopped,
            _ => Self::Connecting,
        }
    }
}

/// Which upstream link a status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Market data feed.
    Feed,
    /// Message broker.
    Broker,
}

impl LinkKind {
    /// Get the link name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Broker => "broker",
        }
    }
}

/// Live status of one upstream link.
#[derive(Debug)]
pub struct LinkStatus {
    kind: LinkKind,
    state: AtomicU8,
    messages_received: AtomicU64,
    reconnect_attempts: AtomicU64,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl LinkStatus {
    /// Create a status in the initial `Connecting` state.
    #[must_use]
    pub const fn new(kind: LinkKind) -> Self {
        Self {
            kind,
            state: AtomicU8::new(0),
            messages_received: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Which link this status tracks.
    #[must_use]
    pub const fn kind(&self) -> LinkKind {
        self.kind
    }

    /// Set the connection state.
    ///
    /// Entering `Streaming` records the connect time and clears the
    /// consecutive reconnect count and last error.
    pub fn set_state(&self, state: LinkState) {
        self.state.store(state.to_u8(), Ordering::Release);
        if state == LinkState::Streaming {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Enter `Backoff` after a failure, recording the error.
    pub fn record_failure(&self, error: String) {
        self.state
            .store(LinkState::Backoff.to_u8(), Ordering::Release);
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(error);
    }

    /// Increment the received-message counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check whether the link is currently streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state() == LinkState::Streaming
    }

    /// Total messages received over the process lifetime.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Consecutive failures since the link last reached `Streaming`.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// When the link last reached `Streaming`.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// The most recent failure, cleared on reconnect.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

/// Shared link status reference.
pub type SharedLinkStatus = std::sync::Arc<LinkStatus>;
