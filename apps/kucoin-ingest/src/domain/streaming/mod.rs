//! Market Data Record Types
//!
//! Canonical ticker and trade records produced by the normalizer and
//! committed to sinks. These types are venue-agnostic; all timestamps
//! are UTC.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::ChannelKind;

/// Side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Taker bought.
    Buy,
    /// Taker sold.
    Sell,
}

impl TradeSide {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Last traded price of a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Venue tag.
    pub exchange: String,
    /// Venue market identifier.
    pub market: String,
    /// Name the record is committed under.
    pub commit_name: String,
    /// Price.
    pub price: Decimal,
    /// Event time, or receipt time when the venue does not supply one.
    pub timestamp: DateTime<Utc>,
}

/// An executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue tag.
    pub exchange: String,
    /// Venue market identifier.
    pub market: String,
    /// Name the record is committed under.
    pub commit_name: String,
    /// Venue trade identifier (empty when the venue omits it).
    pub trade_id: String,
    /// Taker side.
    pub side: TradeSide,
    /// Executed size.
    pub size: Decimal,
    /// Executed price.
    pub price: Decimal,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

/// A full batch of records of one kind, handed to a sink for commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// Ticker batch.
    Tickers(Vec<Ticker>),
    /// Trade batch.
    Trades(Vec<Trade>),
}

impl Batch {
    /// Channel kind of the records in the batch.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Self::Tickers(_) => ChannelKind::Ticker,
            Self::Trades(_) => ChannelKind::Trade,
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Tickers(records) => records.len(),
            Self::Trades(records) => records.len(),
        }
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
