//! Stream Codec
//!
//! Turns raw stream frames into the closed [`Inbound`] envelope and builds
//! outbound frames. String tags (`type`, topic namespaces) are only
//! interpreted here.
//!
//! # Envelope
//!
//! ```json
//! {"id": "1", "type": "ack"}
//! {"id": "hQvf8jkno", "type": "welcome"}
//! {"id": "1625000000000", "type": "pong"}
//! {"type": "message", "topic": "/market/ticker:BTC-USDT", "data": {"price": "34000.1"}}
//! {"id": "1", "type": "error", "code": 404, "data": "topic /market/ticker:FOO is not found"}
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::application::error::PipelineError;
use crate::domain::market::ChannelKind;
use crate::infrastructure::kucoin::messages::{PingRequest, PushData, SubscribeRequest};

/// Topic namespace of ticker messages.
pub const TICKER_NAMESPACE: &str = "/market/ticker";

/// Topic namespace of trade (match) messages.
pub const MATCH_NAMESPACE: &str = "/market/match";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A decimal field could not be parsed.
    #[error("invalid decimal in field {field}: {value:?}")]
    InvalidDecimal {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// An event time has an unexpected shape or value.
    #[error("invalid trade time: {0}")]
    InvalidTime(String),

    /// Unknown trade side.
    #[error("invalid trade side: {0:?}")]
    InvalidSide(String),
}

impl From<CodecError> for PipelineError {
    fn from(err: CodecError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Server greeting after connect.
    Welcome,
    /// Keep-alive acknowledgement.
    Pong,
    /// Subscription acknowledgement; `id` is `None` if it is not numeric.
    Ack {
        /// Echoed subscription id.
        id: Option<u32>,
    },
    /// Data message. The payload stays raw until the topic is known to
    /// belong to a subscription; see [`decode_push_data`].
    Message {
        /// Full topic, e.g. `/market/match:BTC-USDT`; empty when absent.
        topic: String,
        /// Payload; `Null` when absent.
        data: Value,
    },
    /// Server-reported protocol error.
    Error {
        /// Error code, if any.
        code: Option<String>,
        /// Error description.
        message: String,
    },
    /// Any other envelope type.
    Unknown(String),
}

/// Decode one frame.
///
/// # Errors
///
/// Returns `CodecError` if the frame is not a JSON envelope with a
/// `type` tag. Data payloads are not inspected here.
pub fn decode_frame(frame: &[u8]) -> Result<Inbound, CodecError> {
    let mut value: Value = serde_json::from_slice(frame)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField("type"))?;

    let inbound = match kind {
        "welcome" => Inbound::Welcome,
        "pong" => Inbound::Pong,
        "ack" => Inbound::Ack {
            id: value.get("id").and_then(parse_id),
        },
        "message" => Inbound::Message {
            topic: value
                .get("topic")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            data: value.get_mut("data").map(Value::take).unwrap_or_default(),
        },
        "error" => Inbound::Error {
            code: value.get("code").map(value_to_string),
            message: value.get("data").map(value_to_string).unwrap_or_default(),
        },
        other => Inbound::Unknown(other.to_string()),
    };
    Ok(inbound)
}

/// Decode the payload of a data message.
///
/// # Errors
///
/// Returns `CodecError` if the payload is missing or malformed.
pub fn decode_push_data(data: &Value) -> Result<PushData, CodecError> {
    if data.is_null() {
        return Err(CodecError::MissingField("data"));
    }
    Ok(PushData::deserialize(data)?)
}

fn parse_id(value: &Value) -> Option<u32> {
    match value {
        Value::String(text) => text.parse().ok(),
        Value::Number(number) => number.as_u64().and_then(|id| u32::try_from(id).ok()),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Split a topic into channel kind and market.
///
/// Returns `None` when the topic has no `:` separator, an empty market,
/// or an unknown namespace.
#[must_use]
pub fn parse_topic(topic: &str) -> Option<(ChannelKind, &str)> {
    let (namespace, market) = topic.split_once(':')?;
    if market.is_empty() {
        return None;
    }
    let kind = match namespace {
        TICKER_NAMESPACE => ChannelKind::Ticker,
        MATCH_NAMESPACE => ChannelKind::Trade,
        _ => return None,
    };
    Some((kind, market))
}

/// Topic registering `kind` updates of `market`.
#[must_use]
pub fn topic_for(kind: ChannelKind, market: &str) -> String {
    let namespace = match kind {
        ChannelKind::Ticker => TICKER_NAMESPACE,
        ChannelKind::Trade => MATCH_NAMESPACE,
    };
    format!("{namespace}:{market}")
}

/// Encode a subscribe request.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails.
pub fn encode_subscribe(id: u32, topic: &str) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&SubscribeRequest {
        id,
        kind: "subscribe",
        topic,
        private_channel: false,
        response: true,
    })?)
}

/// Encode a keep-alive ping.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails.
pub fn encode_ping(nonce: &str) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&PingRequest {
        id: nonce,
        kind: "ping",
    })?)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::infrastructure::kucoin::messages::WireTime;

    #[test_case(br#"{"id":"a","type":"welcome"}"#, Inbound::Welcome ; "welcome")]
    #[test_case(br#"{"id":"1","type":"pong"}"#, Inbound::Pong ; "pong")]
    #[test_case(br#"{"id":"12","type":"ack"}"#, Inbound::Ack { id: Some(12) } ; "ack string id")]
    #[test_case(br#"{"id":12,"type":"ack"}"#, Inbound::Ack { id: Some(12) } ; "ack numeric id")]
    #[test_case(br#"{"id":"x","type":"ack"}"#, Inbound::Ack { id: None } ; "ack bad id")]
    #[test_case(br#"{"type":"notice"}"#, Inbound::Unknown("notice".into()) ; "unknown")]
    fn decodes_control_frames(frame: &[u8], expected: Inbound) {
        assert_eq!(decode_frame(frame).unwrap(), expected);
    }

    #[test]
    fn decodes_message() {
        let frame = br#"{"type":"message","topic":"/market/match:BTC-USDT","subject":"trade.l3match",
            "data":{"tradeId":"t1","side":"buy","size":"0.1","price":"34000","time":"1625000000000000000"}}"#;
        let Inbound::Message { topic, data } = decode_frame(frame).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(topic, "/market/match:BTC-USDT");
        let data = decode_push_data(&data).unwrap();
        assert_eq!(data.trade_id, "t1");
        assert_eq!(data.time, Some(WireTime::Text("1625000000000000000".into())));
    }

    #[test]
    fn decodes_error_envelope() {
        let frame = br#"{"id":"1","type":"error","code":404,"data":"topic is not found"}"#;
        assert_eq!(
            decode_frame(frame).unwrap(),
            Inbound::Error {
                code: Some("404".into()),
                message: "topic is not found".into(),
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode_frame(b"not json"), Err(CodecError::Json(_))));
        assert!(matches!(
            decode_frame(br#"{"id":"1"}"#),
            Err(CodecError::MissingField("type"))
        ));
    }

    #[test]
    fn message_payload_is_left_raw() {
        assert_eq!(
            decode_frame(br#"{"type":"message","topic":"nomarket","data":{}}"#).unwrap(),
            Inbound::Message {
                topic: "nomarket".into(),
                data: serde_json::json!({}),
            }
        );
        assert_eq!(
            decode_frame(br#"{"type":"message"}"#).unwrap(),
            Inbound::Message {
                topic: String::new(),
                data: Value::Null,
            }
        );
    }

    #[test]
    fn push_data_requires_a_price() {
        assert!(matches!(
            decode_push_data(&serde_json::json!({})),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            decode_push_data(&Value::Null),
            Err(CodecError::MissingField("data"))
        ));
    }

    #[test_case("/market/ticker:BTC-USDT", Some((ChannelKind::Ticker, "BTC-USDT")) ; "ticker")]
    #[test_case("/market/match:ETH-BTC", Some((ChannelKind::Trade, "ETH-BTC")) ; "match")]
    #[test_case("nomarket", None ; "no separator")]
    #[test_case("/market/ticker:", None ; "empty market")]
    #[test_case("/market/level2:BTC-USDT", None ; "unknown namespace")]
    fn parses_topics(topic: &str, expected: Option<(ChannelKind, &str)>) {
        assert_eq!(parse_topic(topic), expected);
    }

    #[test]
    fn topic_round_trips_through_parse() {
        let topic = topic_for(ChannelKind::Trade, "BTC-USDT");
        assert_eq!(topic, "/market/match:BTC-USDT");
        assert_eq!(parse_topic(&topic), Some((ChannelKind::Trade, "BTC-USDT")));
    }

    #[test]
    fn encodes_ping() {
        let frame = encode_ping("1625000000000").unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, serde_json::json!({"id": "1625000000000", "type": "ping"}));
    }
}
