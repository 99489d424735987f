//! Client Session Registry
//!
//! Tracks connected client WebSocket sessions and fans broker messages out
//! to all of them.
//!
//! # Architecture
//!
//! Each session owns a bounded `mpsc` buffer drained by its socket writer
//! task. `broadcast` never waits on a client: it `try_send`s into every
//! buffer, and a session whose buffer is full or whose writer has gone away
//! is evicted on the spot. Eviction cancels the session's token so the
//! socket tasks shut the connection down.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::infrastructure::metrics;

/// Default per-session buffer size, in messages.
pub const DEFAULT_SESSION_BUFFER: usize = 1_000;

/// Unique session identifier.
pub type SessionId = Uuid;

// =============================================================================
// Client Session
// =============================================================================

/// Why a send to a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// The session buffer is full (slow consumer).
    #[error("session buffer full")]
    Full,
    /// The session writer has stopped.
    #[error("session closed")]
    Closed,
}

/// One connected client.
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    tx: mpsc::Sender<Bytes>,
    connected_at: DateTime<Utc>,
    closed: CancellationToken,
}

impl ClientSession {
    /// Create a session with a bounded outbound buffer.
    ///
    /// Returns the session and the receiving end of its buffer, which the
    /// socket writer drains.
    #[must_use]
    pub fn new(buffer_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer_capacity.max(1));
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            tx,
            connected_at: Utc::now(),
            closed: CancellationToken::new(),
        });
        (session, rx)
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// When the session connected.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a payload without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is full or the writer has stopped.
    pub fn try_send(&self, payload: Bytes) -> Result<(), SendFailure> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Signal the socket tasks to close the connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Check whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the session is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

// =============================================================================
// Client Registry
// =============================================================================

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the payload was queued to.
    pub delivered: usize,
    /// Sessions evicted because the send failed.
    pub evicted: Vec<SessionId>,
}

/// Concurrency-safe registry of client sessions.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use market_relay::infrastructure::broadcast::ClientRegistry;
///
/// let registry = ClientRegistry::new(8);
/// let (session, mut rx) = registry.open_session();
///
/// let report = registry.broadcast(&Bytes::from_static(b"hello"));
/// assert_eq!(report.delivered, 1);
/// assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"hello"));
///
/// registry.remove(&session.id());
/// assert_eq!(registry.session_count(), 0);
/// ```
#[derive(Debug)]
pub struct ClientRegistry {
    sessions: DashMap<SessionId, Arc<ClientSession>>,
    buffer_capacity: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_BUFFER)
    }
}

impl ClientRegistry {
    /// Create an empty registry whose sessions buffer `buffer_capacity`
    /// messages each.
    #[must_use]
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            buffer_capacity: buffer_capacity.max(1),
        }
    }

    /// Per-session buffer size.
    #[must_use]
    pub const fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Create a session sized for this registry and register it.
    #[must_use]
    pub fn open_session(&self) -> (Arc<ClientSession>, mpsc::Receiver<Bytes>) {
        let (session, rx) = ClientSession::new(self.buffer_capacity);
        self.add(Arc::clone(&session));
        (session, rx)
    }

    /// Register a session.
    pub fn add(&self, session: Arc<ClientSession>) {
        let id = session.id();
        self.sessions.insert(id, session);
        metrics::set_client_sessions(self.sessions.len());
        tracing::info!(session_id = %id, sessions = self.sessions.len(), "Client session registered");
    }

    /// Deregister a session. Removing an unknown session is a no-op.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<ClientSession>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            metrics::set_client_sessions(self.sessions.len());
            tracing::info!(session_id = %id, sessions = self.sessions.len(), "Client session removed");
        }
        removed
    }

    /// Check whether a session is registered.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Queue `payload` to every session registered at call time.
    ///
    /// A failed send evicts and closes that session; delivery to the
    /// remaining sessions continues.
    pub fn broadcast(&self, payload: &Bytes) -> BroadcastReport {
        let targets: Vec<Arc<ClientSession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut report = BroadcastReport::default();

        for session in targets {
            match session.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    tracing::warn!(
                        session_id = %session.id(),
                        reason = %reason,
                        "Evicting client session after failed send"
                    );
                    self.sessions.remove(&session.id());
                    session.close();
                    report.evicted.push(session.id());
                }
            }
        }

        if !report.evicted.is_empty() {
            metrics::set_client_sessions(self.sessions.len());
        }
        metrics::record_broadcast(report.delivered as u64, report.evicted.len() as u64);

        report
    }
}

/// Shared client registry reference.
pub type SharedClientRegistry = Arc<ClientRegistry>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &'static str) -> Bytes {
        Bytes::from_static(text.as_bytes())
    }

    #[test]
    fn registry_starts_empty() {
        let registry = ClientRegistry::default();
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.buffer_capacity(), DEFAULT_SESSION_BUFFER);
        assert_eq!(registry.broadcast(&payload("m")), BroadcastReport::default());
    }

    #[test]
    fn add_and_remove() {
        let registry = ClientRegistry::new(4);
        let (session, _rx) = ClientSession::new(4);

        registry.add(Arc::clone(&session));
        assert!(registry.contains(&session.id()));
        assert_eq!(registry.session_count(), 1);

        assert!(registry.remove(&session.id()).is_some());
        assert!(registry.remove(&session.id()).is_none());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn broadcast_reaches_every_session() {
        let registry = ClientRegistry::new(4);
        let (_s1, mut rx1) = registry.open_session();
        let (_s2, mut rx2) = registry.open_session();

        let report = registry.broadcast(&payload("M"));
        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());

        assert_eq!(rx1.try_recv().unwrap(), payload("M"));
        assert_eq!(rx2.try_recv().unwrap(), payload("M"));
    }

    #[test]
    fn removed_session_receives_nothing() {
        let registry = ClientRegistry::new(4);
        let (_s1, mut rx1) = registry.open_session();
        let (s2, mut rx2) = registry.open_session();
        registry.remove(&s2.id());

        let report = registry.broadcast(&payload("M"));
        assert_eq!(report.delivered, 1);
        assert_eq!(rx1.try_recv().unwrap(), payload("M"));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn full_buffer_evicts_only_that_session() {
        let registry = ClientRegistry::new(1);
        let (slow, _slow_rx) = registry.open_session();
        let (fast, mut fast_rx) = registry.open_session();

        let first = registry.broadcast(&payload("1"));
        assert_eq!(first.delivered, 2);
        assert_eq!(fast_rx.try_recv().unwrap(), payload("1"));

        let second = registry.broadcast(&payload("2"));
        assert_eq!(second.delivered, 1);
        assert_eq!(second.evicted, vec![slow.id()]);
        assert!(slow.is_closed());
        assert!(!fast.is_closed());
        assert!(!registry.contains(&slow.id()));
        assert_eq!(fast_rx.try_recv().unwrap(), payload("2"));
    }

    #[test]
    fn closed_writer_evicts_session() {
        let registry = ClientRegistry::new(4);
        let (gone, rx) = registry.open_session();
        drop(rx);

        let report = registry.broadcast(&payload("M"));
        assert_eq!(report.delivered, 0);
        assert_eq!(report.evicted, vec![gone.id()]);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn try_send_failures() {
        let (session, rx) = ClientSession::new(1);
        assert!(session.try_send(payload("a")).is_ok());
        assert_eq!(session.try_send(payload("b")), Err(SendFailure::Full));
        drop(rx);
        assert_eq!(session.try_send(payload("c")), Err(SendFailure::Closed));
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let (session, _rx) = ClientSession::new(1);
        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.closed().await })
        };
        session.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
