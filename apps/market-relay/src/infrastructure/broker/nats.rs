//! NATS Message Source
//!
//! Attaches to a NATS subject, optionally as a member of a queue group, and
//! exposes the subscription as a stream of opaque broker messages.
//!
//! The client's own reconnect loop uses the same fixed delay as the relay.
//! If the subscription ends anyway, the bridge reconnects from scratch.
//!
//! Outages the client rides out internally are still reported: connection
//! events move the broker link to `Backoff` on disconnect and back to
//! `Streaming` once the client reconnects.

use std::sync::Arc;
use std::time::Duration;

use async_nats::{ConnectOptions, Event};
use async_trait::async_trait;
use futures::StreamExt;

use crate::application::ports::{BrokerError, BrokerMessage, BrokerStream, MessageSource};
use crate::domain::streaming::{LinkKind, LinkState, LinkStatus, SharedLinkStatus};
use crate::infrastructure::config::{BrokerCredentials, BrokerSettings};
use crate::infrastructure::metrics;

/// NATS-backed broker subscription.
#[derive(Debug, Clone)]
pub struct NatsSource {
    settings: BrokerSettings,
    status: SharedLinkStatus,
}

impl NatsSource {
    /// Create a source from broker settings, reporting client connection
    /// events onto the broker link status.
    #[must_use]
    pub const fn new(settings: BrokerSettings, status: SharedLinkStatus) -> Self {
        Self { settings, status }
    }

    fn connect_options(&self) -> ConnectOptions {
        let options = match &self.settings.credentials {
            BrokerCredentials::None => ConnectOptions::new(),
            BrokerCredentials::UserPassword { user, password } => {
                ConnectOptions::with_user_and_password(user.clone(), password.clone())
            }
            BrokerCredentials::Token(token) => ConnectOptions::with_token(token.clone()),
        };

        let delay: Duration = self.settings.reconnect_delay;
        let status = Arc::clone(&self.status);
        options
            .name("market-relay")
            .reconnect_delay_callback(move |_attempts| delay)
            .event_callback(move |event| {
                apply_event(&status, &event);
                std::future::ready(())
            })
    }
}

/// Fold a client connection event into the broker link status.
///
/// `Connected` only restores `Streaming` after a disconnect seen here; the
/// first connect is reported by the bridge once the subscription is live.
pub fn apply_event(status: &LinkStatus, event: &Event) {
    match event {
        _ if status.state() == LinkState::Stopped => {}
        Event::Disconnected => {
            tracing::warn!("Broker connection lost, client reconnecting");
            status.record_failure("broker connection lost".to_string());
            metrics::set_link_state(LinkKind::Broker, LinkState::Backoff);
            metrics::record_reconnect(LinkKind::Broker);
        }
        Event::Connected => {
            if status.state() == LinkState::Backoff {
                tracing::info!("Broker connection restored");
                status.set_state(LinkState::Streaming);
                metrics::set_link_state(LinkKind::Broker, LinkState::Streaming);
            }
        }
        Event::SlowConsumer(sid) => {
            tracing::warn!(sid = *sid, "Broker reports slow consumer");
        }
        other => {
            tracing::debug!(event = %other, "Broker client event");
        }
    }
}

#[async_trait]
impl MessageSource for NatsSource {
    async fn subscribe(&self) -> Result<BrokerStream, BrokerError> {
        let client = self
            .connect_options()
            .connect(self.settings.url.as_str())
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let subject = self.settings.subject.clone();
        let subscriber = match &self.settings.queue_group {
            Some(group) => client.queue_subscribe(subject, group.clone()).await,
            None => client.subscribe(subject).await,
        }
        .map_err(|e| BrokerError::SubscribeFailed(e.to_string()))?;

        tracing::info!(
            subject = %self.settings.subject,
            queue_group = ?self.settings.queue_group,
            "Attached to broker subject"
        );

        let stream = subscriber.map(|message| {
            BrokerMessage::new(message.payload).with_subject(message.subject.to_string())
        });

        Ok(stream.boxed())
    }

    fn describe(&self) -> String {
        format!("nats {} subject={}", self.settings.url, self.settings.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> SharedLinkStatus {
        Arc::new(LinkStatus::new(LinkKind::Broker))
    }

    fn settings(url: &str) -> BrokerSettings {
        BrokerSettings {
            url: url.to_string(),
            credentials: BrokerCredentials::UserPassword {
                user: "relay".to_string(),
                password: "hunter2".to_string(),
            },
            reconnect_delay: Duration::from_millis(10),
            ..BrokerSettings::default()
        }
    }

    #[test]
    fn describe_omits_credentials() {
        let source = NatsSource::new(settings("nats://localhost:4222"), status());
        let description = source.describe();
        assert_eq!(description, "nats nats://localhost:4222 subject=notifications.>");
        assert!(!description.contains("hunter2"));
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_failure() {
        let source = NatsSource::new(settings("nats://127.0.0.1:1"), status());
        let result = tokio::time::timeout(Duration::from_secs(10), source.subscribe())
            .await
            .unwrap();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }

    #[test]
    fn disconnect_marks_link_backoff_until_reconnected() {
        let status = status();
        status.set_state(LinkState::Streaming);

        apply_event(&status, &Event::Disconnected);
        assert_eq!(status.state(), LinkState::Backoff);
        assert_eq!(status.reconnect_attempts(), 1);
        assert_eq!(status.last_error().as_deref(), Some("broker connection lost"));

        apply_event(&status, &Event::Disconnected);
        assert_eq!(status.reconnect_attempts(), 2);

        apply_event(&status, &Event::Connected);
        assert!(status.is_streaming());
        assert_eq!(status.reconnect_attempts(), 0);
    }

    #[test]
    fn first_connect_leaves_state_to_the_bridge() {
        let status = status();
        status.set_state(LinkState::Connecting);

        apply_event(&status, &Event::Connected);
        assert_eq!(status.state(), LinkState::Connecting);

        apply_event(&status, &Event::SlowConsumer(3));
        assert_eq!(status.state(), LinkState::Connecting);
    }

    #[test]
    fn events_after_shutdown_are_ignored() {
        let status = status();
        status.set_state(LinkState::Stopped);

        apply_event(&status, &Event::Disconnected);
        apply_event(&status, &Event::Connected);
        assert_eq!(status.state(), LinkState::Stopped);
        assert_eq!(status.reconnect_attempts(), 0);
    }
}
