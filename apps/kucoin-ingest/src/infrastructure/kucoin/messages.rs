//! KuCoin Wire Message Types
//!
//! Wire format types for KuCoin's public market-data API. These map
//! directly to the venue's JSON schemas; decimals and times stay raw here
//! and are parsed by the normalizer.
//!
//! # Message Types
//!
//! ## Handshake (REST)
//! - `BulletResponse`: One-time token and stream endpoints
//!
//! ## Stream (outbound)
//! - `SubscribeRequest`: Channel registration
//! - `PingRequest`: Keep-alive ping
//!
//! ## Stream (inbound)
//! - `welcome`, `pong`, `ack`, `message`, `error` envelopes, see `codec`
//! - `PushData`: Payload of ticker and match messages
//!
//! ## Polling (REST)
//! - `RestTickerResponse`: Level-1 order book snapshot
//! - `RestTradesResponse`: Most recent trades

use serde::{Deserialize, Serialize};

/// Success code of KuCoin REST responses.
pub const SUCCESS_CODE: &str = "200000";

// =============================================================================
// Handshake
// =============================================================================

/// Response of `POST bullet-public`.
///
/// ```json
/// {
///   "code": "200000",
///   "data": {
///     "token": "2neAiuYvAU61ZD...",
///     "instanceServers": [{
///       "endpoint": "wss://ws-api-spot.kucoin.com/",
///       "protocol": "websocket",
///       "encrypt": true,
///       "pingInterval": 18000,
///       "pingTimeout": 10000
///     }]
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulletResponse {
    /// Response code, `"200000"` on success.
    pub code: String,
    /// Token and servers.
    #[serde(default)]
    pub data: Option<BulletData>,
}

/// Payload of [`BulletResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulletData {
    /// One-time connect token.
    pub token: String,
    /// Candidate stream servers.
    #[serde(rename = "instanceServers", default)]
    pub instance_servers: Vec<InstanceServer>,
}

/// One candidate stream server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceServer {
    /// Stream endpoint URL.
    pub endpoint: String,
    /// Transport protocol name.
    #[serde(default)]
    pub protocol: String,
    /// Suggested keep-alive interval in milliseconds.
    #[serde(rename = "pingInterval")]
    pub ping_interval_ms: u64,
}

// =============================================================================
// Outbound
// =============================================================================

/// Channel registration request.
///
/// ```json
/// {"id": 1, "type": "subscribe", "topic": "/market/ticker:BTC-USDT", "privateChannel": false, "response": true}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest<'a> {
    /// Subscription id, echoed in the ack.
    pub id: u32,
    /// Always `subscribe`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Topic to register.
    pub topic: &'a str,
    /// Always `false` for public channels.
    #[serde(rename = "privateChannel")]
    pub private_channel: bool,
    /// Ask the server for an ack.
    pub response: bool,
}

/// Keep-alive ping.
///
/// ```json
/// {"id": "1625000000000", "type": "ping"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingRequest<'a> {
    /// Nonce.
    pub id: &'a str,
    /// Always `ping`.
    #[serde(rename = "type")]
    pub kind: &'static str,
}

// =============================================================================
// Inbound
// =============================================================================

/// Event time as sent by the venue: a string on the stream, a number over REST.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireTime {
    /// Decimal string, e.g. `"1625000000000000000"`.
    Text(String),
    /// JSON number, integer or float.
    Number(serde_json::Number),
}

/// Payload of a pushed ticker or match message.
///
/// ```json
/// {
///   "type": "message",
///   "topic": "/market/match:BTC-USDT",
///   "subject": "trade.l3match",
///   "data": {
///     "tradeId": "5c24c5da03aa673885cd67aa",
///     "side": "buy",
///     "size": "0.01022222",
///     "price": "0.08200000",
///     "time": "1545913818099033203"
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushData {
    /// Trade id (matches only).
    #[serde(rename = "tradeId", default)]
    pub trade_id: String,
    /// Taker side (matches only).
    #[serde(default)]
    pub side: String,
    /// Size.
    #[serde(default)]
    pub size: String,
    /// Price.
    pub price: String,
    /// Event time.
    #[serde(default)]
    pub time: Option<WireTime>,
}

// =============================================================================
// Polling
// =============================================================================

/// Response of `GET market/orderbook/level1`.
///
/// ```json
/// {"code": "200000", "data": {"time": 1625000000000, "sequence": "1550467636704", "price": "0.03715005", "size": "0.17", "bestBid": "0.03710768", "bestAsk": "0.03715004"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestTickerResponse {
    /// Response code.
    #[serde(default)]
    pub code: Option<String>,
    /// Snapshot; absent for unknown symbols.
    #[serde(default)]
    pub data: Option<RestTickerData>,
}

/// Level-1 snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestTickerData {
    /// Last traded price.
    pub price: String,
    /// Server time in milliseconds.
    #[serde(default)]
    pub time: Option<i64>,
}

/// Response of `GET market/histories`.
///
/// ```json
/// {"code": "200000", "data": [{"sequence": "1545896668571", "price": "0.07", "size": "0.004", "side": "buy", "time": 1545904567062140823}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestTradesResponse {
    /// Response code.
    #[serde(default)]
    pub code: Option<String>,
    /// Most recent trades, newest first.
    #[serde(default)]
    pub data: Vec<RestTradeData>,
}

/// One historical trade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestTradeData {
    /// Trade id, when present.
    #[serde(rename = "tradeId", default)]
    pub trade_id: String,
    /// Taker side.
    pub side: String,
    /// Size.
    pub size: String,
    /// Price.
    pub price: String,
    /// Event time in nanoseconds.
    pub time: WireTime,
}

// =============================================================================
// Tests
// =============================================================================
