//! Feed Ingester
//!
//! Holds exactly one live subscription to the market data feed and writes
//! every decoded tick into the shared price cache.
//!
//! # Connection Lifecycle
//!
//! 1. Connect to the feed endpoint with the token as a query parameter.
//! 2. Send one subscribe request per tracked symbol. The handshake and the
//!    subscribe requests are each bounded by the connect timeout.
//! 3. Read frames, applying ticks to the cache, until the connection fails,
//!    goes idle, or shutdown is requested.
//! 4. On failure wait the fixed reconnect delay and start again at 1.
//!
//! Errors never leave this module; they are logged, counted and recorded in
//! the link status for the health endpoint.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::codec::{CodecError, FeedCodec, FeedEvent, SubscribeRequest};
use super::reconnect::ReconnectPolicy;
use crate::application::ports::BackgroundLoop;
use crate::domain::pricing::SharedPriceCache;
use crate::domain::streaming::{LinkKind, LinkState, SharedLinkStatus};
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one feed connection.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Endpoint URL could not be built.
    #[error("invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Handshake or subscribe did not finish in time.
    #[error("feed handshake timed out after {}s", .0.as_secs())]
    ConnectTimeout(Duration),

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,

    /// No frame arrived within the idle timeout.
    #[error("no frames received for {}s", .0.as_secs())]
    IdleTimeout(Duration),
}

// =============================================================================
// Feed Ingester
// =============================================================================

/// Market data feed client that keeps the price cache current.
pub struct FeedIngester {
    settings: FeedSettings,
    cache: SharedPriceCache,
    status: SharedLinkStatus,
    codec: FeedCodec,
}

impl FeedIngester {
    /// Create a new ingester.
    #[must_use]
    pub const fn new(
        settings: FeedSettings,
        cache: SharedPriceCache,
        status: SharedLinkStatus,
    ) -> Self {
        Self {
            settings,
            cache,
            status,
            codec: FeedCodec::new(),
        }
    }

    /// Build the endpoint URL including the token query parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured base URL is invalid.
    pub fn endpoint(&self) -> Result<Url, FeedError> {
        Ok(Url::parse_with_params(
            &self.settings.url,
            &[("token", self.settings.token.expose())],
        )?)
    }

    fn set_state(&self, state: LinkState) {
        self.status.set_state(state);
        metrics::set_link_state(LinkKind::Feed, state);
    }

    /// Connect, subscribe and stream until failure or cancellation.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedError> {
        self.set_state(LinkState::Connecting);
        let endpoint = self.endpoint()?;

        tracing::info!(
            url = %self.settings.url,
            symbols = self.settings.symbols.len(),
            "Connecting to market data feed"
        );

        let connect_timeout = self.settings.connect_timeout;
        let ws_stream = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(
                connect_timeout,
                tokio_tungstenite::connect_async(endpoint.as_str()),
            ) => result.map_err(|_| FeedError::ConnectTimeout(connect_timeout))??.0,
        };

        let (mut write, mut read) = ws_stream.split();

        let subscribe = async {
            for symbol in &self.settings.symbols {
                let request = SubscribeRequest::new(symbol).to_json()?;
                write.send(Message::Text(request.into())).await?;
                tracing::debug!(symbol = %symbol, "Subscribed to symbol");
            }
            Ok::<(), FeedError>(())
        };
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(connect_timeout, subscribe) => {
                result.map_err(|_| FeedError::ConnectTimeout(connect_timeout))??;
            }
        }

        self.set_state(LinkState::Streaming);
        policy.reset();
        tracing::info!(
            symbols = ?self.settings.symbols.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Market data feed streaming"
        );

        loop {
            let next_frame = async {
                match self.settings.idle_timeout {
                    Some(idle) => tokio::time::timeout(idle, read.next())
                        .await
                        .map_err(|_| FeedError::IdleTimeout(idle)),
                    None => Ok(read.next().await),
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                frame = next_frame => {
                    match frame? {
                        Some(Ok(Message::Text(text))) => {
                            self.status.increment_messages();
                            self.handle_text(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Feed server sent close frame");
                            return Err(FeedError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Feed stream ended");
                            return Err(FeedError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Decode one text frame and apply its ticks.
    ///
    /// A frame that cannot be decoded is dropped; the connection stays up.
    fn handle_text(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(FeedEvent::Ticks { ticks, skipped }) => {
                for tick in &ticks {
                    self.cache.apply(tick);
                    tracing::trace!(symbol = %tick.symbol(), price = %tick.price(), "Price updated");
                }
                metrics::record_ticks_applied(ticks.len() as u64);
                if skipped > 0 {
                    tracing::debug!(skipped, "Dropped undecodable tick records");
                    metrics::record_frames_dropped("record", skipped as u64);
                }
            }
            Ok(FeedEvent::Ping) => tracing::trace!("Feed keep-alive"),
            Ok(FeedEvent::Error(msg)) => tracing::warn!(error = %msg, "Feed reported error"),
            Ok(FeedEvent::Other) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Dropped undecodable feed frame");
                metrics::record_frames_dropped("frame", 1);
            }
        }
    }
}

#[async_trait]
impl BackgroundLoop for FeedIngester {
    fn name(&self) -> &'static str {
        "feed-ingester"
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.settings.reconnect_delay);

        while !cancel.is_cancelled() {
            let Err(e) = self.connect_and_run(&cancel, &mut policy).await else {
                break;
            };

            self.status.record_failure(e.to_string());
            metrics::set_link_state(LinkKind::Feed, LinkState::Backoff);
            metrics::record_reconnect(LinkKind::Feed);

            let delay = policy.next_delay();
            tracing::warn!(
                error = %e,
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Feed connection lost, reconnecting"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(LinkState::Stopped);
        tracing::info!("Feed ingester stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::pricing::{PriceCache, Symbol};
    use crate::domain::streaming::LinkStatus;
    use crate::infrastructure::config::FeedToken;

    fn ingester(url: &str) -> FeedIngester {
        let symbols = vec![Symbol::new("AAPL"), Symbol::new("NVDA")];
        let settings = FeedSettings {
            url: url.to_string(),
            token: FeedToken::new("s3cr3t&x".to_string()),
            symbols: symbols.clone(),
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            idle_timeout: None,
        };
        FeedIngester::new(
            settings,
            Arc::new(PriceCache::new(symbols)),
            Arc::new(LinkStatus::new(LinkKind::Feed)),
        )
    }

    #[test]
    fn endpoint_carries_encoded_token() {
        let url = ingester("wss://ws.finnhub.io").endpoint().unwrap();
        assert_eq!(url.as_str(), "wss://ws.finnhub.io/?token=s3cr3t%26x");
    }

    #[test]
    fn invalid_base_url() {
        assert!(matches!(
            ingester("not a url").endpoint(),
            Err(FeedError::InvalidUrl(_))
        ));
    }

    #[test]
    fn text_frames_update_cache() {
        let ingester = ingester("wss://ws.finnhub.io");
        ingester.handle_text(r#"{"type":"trade","data":[{"s":"AAPL","p":150.2}]}"#);
        ingester.handle_text("garbage");
        ingester.handle_text(r#"{"type":"trade","data":[{"s":"AAPL","p":150.4},{"s":"NVDA"}]}"#);

        assert_eq!(
            ingester.cache.get(&Symbol::new("AAPL")),
            Some(Decimal::new(1504, 1))
        );
        assert_eq!(ingester.cache.get(&Symbol::new("NVDA")), None);
    }

    #[tokio::test]
    async fn unreachable_feed_backs_off_until_cancelled() {
        let ingester = Arc::new(ingester("ws://127.0.0.1:1"));
        let cancel = CancellationToken::new();

        let task = {
            let ingester = Arc::clone(&ingester);
            let cancel = cancel.clone();
            tokio::spawn(async move { ingester.run(cancel).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while ingester.status.reconnect_attempts() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(ingester.status.last_error().is_some());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ingester.status.state(), LinkState::Stopped);
    }
}
