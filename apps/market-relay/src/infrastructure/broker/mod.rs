//! Message Broker Adapters
//!
//! - **nats**: NATS subscription exposed through the `MessageSource` port
//! - **bridge**: the loop that fans broker messages out to client sessions

pub mod bridge;
pub mod nats;

pub use bridge::BrokerBridge;
pub use nats::NatsSource;
