//! Market Data Feed Adapter
//!
//! WebSocket client for the third-party market data feed:
//!
//! - **codec**: subscribe requests and tick frame decoding (JSON)
//! - **reconnect**: fixed-delay reconnection policy
//! - **ingester**: the connection loop that keeps the price cache current

pub mod codec;
pub mod ingester;
pub mod reconnect;

pub use codec::{CodecError, FeedCodec, FeedEvent, SubscribeRequest};
pub use ingester::{FeedError, FeedIngester};
pub use reconnect::ReconnectPolicy;
