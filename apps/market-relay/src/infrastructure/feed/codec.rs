//! Feed Frame Codec
//!
//! Encodes subscribe requests and decodes inbound feed frames.
//!
//! # Wire Format
//!
//! Outbound, one request per tracked symbol:
//! ```json
//! {"type":"subscribe","symbol":"AAPL"}
//! ```
//!
//! Inbound frames are JSON objects. Tick frames carry a `data` array:
//! ```json
//! {"type":"trade","data":[{"s":"AAPL","p":150.2,"t":1700000000000,"v":10}]}
//! ```
//!
//! Records missing `s` or `p`, or with a non-numeric price, are dropped one
//! at a time; the rest of the frame is still applied.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::pricing::{PriceTick, Symbol};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// Outbound subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    symbol: &'a str,
}

impl<'a> SubscribeRequest<'a> {
    /// Create a subscribe request for one symbol.
    #[must_use]
    pub fn new(symbol: &'a Symbol) -> Self {
        Self {
            kind: "subscribe",
            symbol: symbol.as_str(),
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Tick records, with undecodable records already removed.
    Ticks {
        /// Decoded ticks in frame order.
        ticks: Vec<PriceTick>,
        /// Records in the frame that could not be decoded.
        skipped: usize,
    },
    /// Server keep-alive.
    Ping,
    /// Server-reported error.
    Error(String),
    /// Any other frame without tick data.
    Other,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<Vec<serde_json::Value>>,
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTick {
    s: String,
    p: Decimal,
}

/// JSON codec for the market data feed.
#[derive(Debug, Default, Clone)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object.
    pub fn decode(&self, text: &str) -> Result<FeedEvent, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let frame: RawFrame = serde_json::from_str(trimmed)?;

        if let Some(records) = frame.data {
            let total = records.len();
            let ticks: Vec<PriceTick> = records.into_iter().filter_map(decode_record).collect();
            let skipped = total - ticks.len();
            return Ok(FeedEvent::Ticks { ticks, skipped });
        }

        Ok(match frame.kind.as_deref() {
            Some("ping") => FeedEvent::Ping,
            Some("error") => FeedEvent::Error(frame.msg.unwrap_or_default()),
            _ => FeedEvent::Other,
        })
    }
}

fn decode_record(value: serde_json::Value) -> Option<PriceTick> {
    let raw: RawTick = serde_json::from_value(value).ok()?;
    let symbol = Symbol::new(&raw.s);
    if symbol.is_empty() {
        return None;
    }
    Some(PriceTick::new(symbol, raw.p))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn codec() -> FeedCodec {
        FeedCodec::new()
    }

    #[test]
    fn subscribe_request_json() {
        let symbol = Symbol::new("aapl");
        let json = SubscribeRequest::new(&symbol).to_json().unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"AAPL"}"#);
    }

    #[test]
    fn decode_trade_frame() {
        let text = r#"{"type":"trade","data":[
            {"s":"AAPL","p":150.2,"t":1700000000000,"v":10},
            {"s":"NVDA","p":487.55,"t":1700000000001,"v":3}
        ]}"#;

        let event = codec().decode(text).unwrap();
        assert_eq!(
            event,
            FeedEvent::Ticks {
                ticks: vec![
                    PriceTick::new(Symbol::new("AAPL"), Decimal::new(1502, 1)),
                    PriceTick::new(Symbol::new("NVDA"), Decimal::new(48755, 2)),
                ],
                skipped: 0,
            }
        );
    }

    #[test]
    fn malformed_records_skipped_individually() {
        let text = r#"{"type":"trade","data":[
            {"s":"AAPL"},
            {"p":1.0},
            {"s":"NVDA","p":"n/a"},
            {"s":"","p":2.0},
            {"s":"MSFT","p":410}
        ]}"#;

        let event = codec().decode(text).unwrap();
        assert_eq!(
            event,
            FeedEvent::Ticks {
                ticks: vec![PriceTick::new(Symbol::new("MSFT"), Decimal::new(410, 0))],
                skipped: 4,
            }
        );
    }

    #[test]
    fn empty_data_array() {
        let event = codec().decode(r#"{"type":"trade","data":[]}"#).unwrap();
        assert_eq!(
            event,
            FeedEvent::Ticks {
                ticks: vec![],
                skipped: 0
            }
        );
    }

    #[test_case(r#"{"type":"ping"}"#, &FeedEvent::Ping ; "ping")]
    #[test_case(r#"{"type":"error","msg":"Invalid token"}"#, &FeedEvent::Error("Invalid token".to_string()) ; "error")]
    #[test_case(r#"{"type":"news"}"#, &FeedEvent::Other ; "unknown type")]
    #[test_case("{}", &FeedEvent::Other ; "empty object")]
    fn frames_without_ticks(text: &str, expected: &FeedEvent) {
        assert_eq!(&codec().decode(text).unwrap(), expected);
    }

    #[test_case("not json" ; "plain text")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case(r#"{"type":"trade","data":"#; "truncated")]
    #[test_case(r#"{"data":5}"# ; "data not an array")]
    fn undecodable_frames(text: &str) {
        assert!(codec().decode(text).is_err());
    }
}
