//! Broker Bridge
//!
//! Holds exactly one live broker subscription and broadcasts every
//! delivered message, unchanged, to all registered client sessions.
//!
//! Runs the same `CONNECTING → STREAMING → BACKOFF` cycle as the feed
//! ingester with unbounded retries at a fixed delay. The subscription
//! stream ending counts as a connection loss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BackgroundLoop, BrokerError, BrokerMessage, MessageSource};
use crate::domain::streaming::{LinkKind, LinkState, SharedLinkStatus};
use crate::infrastructure::broadcast::{BroadcastReport, SharedClientRegistry};
use crate::infrastructure::feed::ReconnectPolicy;
use crate::infrastructure::metrics;

/// Broker-to-client fan-out loop.
pub struct BrokerBridge {
    source: Arc<dyn MessageSource>,
    registry: SharedClientRegistry,
    status: SharedLinkStatus,
    reconnect_delay: Duration,
}

impl BrokerBridge {
    /// Create a new bridge.
    #[must_use]
    pub fn new(
        source: Arc<dyn MessageSource>,
        registry: SharedClientRegistry,
        status: SharedLinkStatus,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            source,
            registry,
            status,
            reconnect_delay,
        }
    }

    fn set_state(&self, state: LinkState) {
        self.status.set_state(state);
        metrics::set_link_state(LinkKind::Broker, state);
    }

    /// Subscribe and forward until the subscription is lost or cancelled.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), BrokerError> {
        self.set_state(LinkState::Connecting);
        tracing::info!(broker = %self.source.describe(), "Connecting to message broker");

        let mut stream = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = self.source.subscribe() => result?,
        };

        self.set_state(LinkState::Streaming);
        policy.reset();
        tracing::info!("Broker subscription streaming");

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                message = stream.next() => match message {
                    Some(message) => {
                        self.forward(&message);
                    }
                    None => return Err(BrokerError::StreamEnded),
                },
            }
        }
    }

    /// Broadcast one message to every registered session.
    pub fn forward(&self, message: &BrokerMessage) -> BroadcastReport {
        self.status.increment_messages();
        metrics::record_broker_message();

        let report = self.registry.broadcast(&message.payload);
        tracing::debug!(
            subject = message.subject.as_deref().unwrap_or_default(),
            bytes = message.payload.len(),
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "Broker message forwarded"
        );
        report
    }
}

#[async_trait]
impl BackgroundLoop for BrokerBridge {
    fn name(&self) -> &'static str {
        "broker-bridge"
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.reconnect_delay);

        while !cancel.is_cancelled() {
            let Err(e) = self.connect_and_run(&cancel, &mut policy).await else {
                break;
            };

            self.status.record_failure(e.to_string());
            metrics::set_link_state(LinkKind::Broker, LinkState::Backoff);
            metrics::record_reconnect(LinkKind::Broker);

            let delay = policy.next_delay();
            tracing::warn!(
                error = %e,
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Broker subscription lost, reconnecting"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(LinkState::Stopped);
        tracing::info!("Broker bridge stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::ports::BrokerStream;
    use crate::domain::streaming::LinkStatus;
    use crate::infrastructure::broadcast::ClientRegistry;

    /// Hands out one queued channel per subscribe; fails once the queue is empty.
    struct QueuedSource {
        streams: Mutex<Vec<mpsc::Receiver<BrokerMessage>>>,
        subscribes: AtomicUsize,
    }

    #[async_trait]
    impl MessageSource for QueuedSource {
        async fn subscribe(&self) -> Result<BrokerStream, BrokerError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let rx = self
                .streams
                .lock()
                .pop()
                .ok_or_else(|| BrokerError::ConnectionFailed("refused".to_string()))?;
            Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|m| (m, rx))
            })
            .boxed())
        }

        fn describe(&self) -> String {
            "queued".to_string()
        }
    }

    #[test]
    fn forward_broadcasts_payload_verbatim() {
        let registry = Arc::new(ClientRegistry::new(4));
        let (_session, mut rx) = registry.open_session();
        let bridge = BrokerBridge::new(
            Arc::new(QueuedSource {
                streams: Mutex::new(vec![]),
                subscribes: AtomicUsize::new(0),
            }),
            Arc::clone(&registry),
            Arc::new(LinkStatus::new(LinkKind::Broker)),
            Duration::from_millis(10),
        );

        let payload = Bytes::from_static(br#"{"alert":"AAPL above 150"}"#);
        let report = bridge.forward(&BrokerMessage::new(payload.clone()).with_subject("alerts"));

        assert_eq!(report.delivered, 1);
        assert_eq!(rx.try_recv().unwrap(), payload);
        assert_eq!(bridge.status.messages_received(), 1);
    }

    #[tokio::test]
    async fn ended_stream_triggers_resubscribe() {
        let (first_tx, first_rx) = mpsc::channel(4);
        let (second_tx, second_rx) = mpsc::channel(4);
        let source = Arc::new(QueuedSource {
            // popped from the back
            streams: Mutex::new(vec![second_rx, first_rx]),
            subscribes: AtomicUsize::new(0),
        });

        let registry = Arc::new(ClientRegistry::new(16));
        let (_session, mut client_rx) = registry.open_session();
        let status = Arc::new(LinkStatus::new(LinkKind::Broker));
        let bridge = Arc::new(BrokerBridge::new(
            Arc::clone(&source) as Arc<dyn MessageSource>,
            registry,
            Arc::clone(&status),
            Duration::from_millis(10),
        ));

        let cancel = CancellationToken::new();
        let task = {
            let bridge = Arc::clone(&bridge);
            let cancel = cancel.clone();
            tokio::spawn(async move { bridge.run(cancel).await })
        };

        first_tx.send(BrokerMessage::new("one")).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Bytes::from_static(b"one"));

        drop(first_tx);
        second_tx.send(BrokerMessage::new("two")).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Bytes::from_static(b"two"));
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 2);
        assert!(status.is_streaming());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state(), LinkState::Stopped);
    }
}
