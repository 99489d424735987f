//! Client WebSocket Sessions
//!
//! `GET /ws` upgrades to a receive-only WebSocket. Each connection is
//! registered with the client registry for its lifetime. A writer task
//! drains the session buffer to the socket and pings the client on an
//! interval; the reader only watches for the connection ending.
//!
//! Every socket write is bounded by the write timeout. A client that stops
//! reading is closed once a write stalls past it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::RelayState;
use crate::infrastructure::broadcast::ClientSession;

/// Upgrade an HTTP request to a client session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one client connection until it closes or is evicted.
async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (session, rx) = state.registry.open_session();
    let session_id = session.id();
    let (ws_tx, mut ws_rx) = socket.split();

    tracing::info!(session_id = %session_id, "Client connected");

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        Arc::clone(&session),
        state.ping_interval,
        state.write_timeout,
    ));

    loop {
        tokio::select! {
            () = session.closed() => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                // Clients are receive-only; pings are answered by the socket.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Client read error");
                    break;
                }
            },
        }
    }

    state.registry.remove(&session_id);
    session.close();
    if tokio::time::timeout(state.write_timeout * 2, &mut writer)
        .await
        .is_err()
    {
        tracing::warn!(session_id = %session_id, "Client writer did not stop, aborting");
        writer.abort();
    }

    tracing::info!(
        session_id = %session_id,
        connected_secs = (chrono::Utc::now() - session.connected_at()).num_seconds(),
        "Client disconnected"
    );
}

/// Forward queued payloads and keep-alive pings to the socket.
///
/// The close frame is only attempted when the last write went through.
async fn write_loop<S>(
    mut ws_tx: S,
    mut rx: mpsc::Receiver<Bytes>,
    session: Arc<ClientSession>,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut writable = true;

    loop {
        let message = tokio::select! {
            () = session.closed() => break,
            payload = rx.recv() => match payload {
                Some(payload) => outbound_message(payload),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };
        if !send_bounded(&mut ws_tx, message, &session, write_timeout).await {
            writable = false;
            break;
        }
    }

    session.close();
    if writable {
        let _ = tokio::time::timeout(write_timeout, ws_tx.send(Message::Close(None))).await;
    }
}

/// Write one frame. Returns false when the write failed, stalled past the
/// timeout, or the session closed while it was pending.
async fn send_bounded<S>(
    ws_tx: &mut S,
    message: Message,
    session: &ClientSession,
    write_timeout: Duration,
) -> bool
where
    S: Sink<Message> + Unpin,
{
    tokio::select! {
        () = session.closed() => false,
        result = tokio::time::timeout(write_timeout, ws_tx.send(message)) => match result {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!(
                    session_id = %session.id(),
                    timeout_ms = u64::try_from(write_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Client write timed out, closing session"
                );
                false
            }
        },
    }
}

/// Frame a broker payload: UTF-8 as text, anything else as binary.
#[must_use]
pub fn outbound_message(payload: Bytes) -> Message {
    match Utf8Bytes::try_from(payload.clone()) {
        Ok(text) => Message::Text(text),
        Err(_) => Message::Binary(payload),
    }
}
