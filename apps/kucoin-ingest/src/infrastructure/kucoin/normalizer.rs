//! Normalizer
//!
//! Converts KuCoin payloads into canonical [`Ticker`] / [`Trade`] records.
//!
//! Trade event times are nanosecond counts whose wire shape depends on the
//! source: a decimal string on the stream, a JSON number over REST. Each
//! source accepts only its own shape; anything else is a decode error.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::streaming::{Ticker, Trade, TradeSide};
use crate::infrastructure::kucoin::codec::CodecError;
use crate::infrastructure::kucoin::messages::{PushData, RestTickerData, RestTradeData, WireTime};

/// Venue tag stamped on every record.
pub const EXCHANGE: &str = "kucoin";

/// Market a payload belongs to.
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    /// Venue market identifier.
    pub market: &'a str,
    /// Name records are committed under.
    pub commit_name: &'a str,
}

/// Ticker from the stream. The venue sends no usable event time, so the
/// receipt time is used.
///
/// # Errors
///
/// Returns `CodecError::InvalidDecimal` for an unparsable price.
pub fn push_ticker(
    origin: Origin<'_>,
    data: &PushData,
    received: DateTime<Utc>,
) -> Result<Ticker, CodecError> {
    Ok(Ticker {
        exchange: EXCHANGE.to_string(),
        market: origin.market.to_string(),
        commit_name: origin.commit_name.to_string(),
        price: parse_decimal("price", &data.price)?,
        timestamp: received,
    })
}

/// Trade from the stream; `time` must be a string of nanoseconds.
///
/// # Errors
///
/// Returns `CodecError` for a malformed decimal, side, or time.
pub fn push_trade(origin: Origin<'_>, data: &PushData) -> Result<Trade, CodecError> {
    let timestamp = match &data.time {
        Some(WireTime::Text(text)) => {
            let nanos = text
                .parse::<i64>()
                .map_err(|_| CodecError::InvalidTime(format!("{text:?} is not an integer")))?;
            DateTime::from_timestamp_nanos(nanos)
        }
        Some(WireTime::Number(number)) => {
            return Err(CodecError::InvalidTime(format!(
                "expected a string on the stream, got number {number}"
            )));
        }
        None => return Err(CodecError::MissingField("time")),
    };

    Ok(Trade {
        exchange: EXCHANGE.to_string(),
        market: origin.market.to_string(),
        commit_name: origin.commit_name.to_string(),
        trade_id: data.trade_id.clone(),
        side: parse_side(&data.side)?,
        size: parse_decimal("size", &data.size)?,
        price: parse_decimal("price", &data.price)?,
        timestamp,
    })
}

/// Ticker from a level-1 poll. Uses the server time (milliseconds) when
/// present, the receipt time otherwise.
///
/// # Errors
///
/// Returns `CodecError::InvalidDecimal` for an unparsable price.
pub fn pull_ticker(
    origin: Origin<'_>,
    data: &RestTickerData,
    received: DateTime<Utc>,
) -> Result<Ticker, CodecError> {
    let timestamp = data
        .time
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(received);

    Ok(Ticker {
        exchange: EXCHANGE.to_string(),
        market: origin.market.to_string(),
        commit_name: origin.commit_name.to_string(),
        price: parse_decimal("price", &data.price)?,
        timestamp,
    })
}

/// Trade from a history poll; `time` must be a number of nanoseconds.
///
/// # Errors
///
/// Returns `CodecError` for a malformed decimal, side, or time.
pub fn pull_trade(origin: Origin<'_>, data: &RestTradeData) -> Result<Trade, CodecError> {
    let timestamp = match &data.time {
        WireTime::Number(number) => DateTime::from_timestamp_nanos(number_to_nanos(number)?),
        WireTime::Text(text) => {
            return Err(CodecError::InvalidTime(format!(
                "expected a number from REST, got string {text:?}"
            )));
        }
    };

    Ok(Trade {
        exchange: EXCHANGE.to_string(),
        market: origin.market.to_string(),
        commit_name: origin.commit_name.to_string(),
        trade_id: data.trade_id.clone(),
        side: parse_side(&data.side)?,
        size: parse_decimal("size", &data.size)?,
        price: parse_decimal("price", &data.price)?,
        timestamp,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_to_nanos(number: &serde_json::Number) -> Result<i64, CodecError> {
    if let Some(nanos) = number.as_i64() {
        return Ok(nanos);
    }
    match number.as_f64() {
        Some(value) if value.is_finite() && value >= i64::MIN as f64 && value < i64::MAX as f64 => {
            Ok(value.trunc() as i64)
        }
        _ => Err(CodecError::InvalidTime(format!("{number} is out of range"))),
    }
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, CodecError> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| CodecError::InvalidDecimal {
            field,
            value: value.to_string(),
        })
}

fn parse_side(side: &str) -> Result<TradeSide, CodecError> {
    match side {
        "buy" => Ok(TradeSide::Buy),
        "sell" => Ok(TradeSide::Sell),
        other => Err(CodecError::InvalidSide(other.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================
