//! Market Configuration Types
//!
//! Immutable description of what to ingest: which markets, which channels
//! per market, how each channel is delivered, and which sinks receive it.
//!
//! # Example (YAML)
//!
//! ```yaml
//! markets:
//!   - id: BTC-USDT
//!     commit_name: BTC-USDT
//!     channels:
//!       - channel: ticker
//!         connector: websocket
//!         ws_consider_int_sec: 0
//!         storages: [terminal]
//!       - channel: trade
//!         connector: rest
//!         rest_ping_int_sec: 5
//!         storages: [terminal, elastic_search]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Kind of market data carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Last traded price updates.
    Ticker,
    /// Executed trades.
    Trade,
}

impl ChannelKind {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trade => "trade",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How updates for a channel reach the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Live updates over the persistent stream.
    #[serde(alias = "websocket")]
    Push,
    /// Periodic request/response polling.
    #[serde(alias = "rest")]
    Pull,
}

impl DeliveryMode {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

/// Downstream storage system receiving committed batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Formatted lines on standard output. Commits cannot fail.
    Terminal,
    /// Elasticsearch bulk index.
    ElasticSearch,
    /// MySQL `ticker` and `trade` tables.
    #[serde(rename = "mysql")]
    MySql,
}

impl SinkKind {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::ElasticSearch => "elastic_search",
            Self::MySql => "mysql",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Market / Channel
// =============================================================================

/// One channel subscription of a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel kind.
    #[serde(rename = "channel")]
    pub kind: ChannelKind,
    /// Delivery mode.
    #[serde(rename = "connector")]
    pub delivery: DeliveryMode,
    /// Polling interval in seconds (pull only).
    #[serde(default, rename = "rest_ping_int_sec")]
    pub poll_interval_sec: u64,
    /// Minimum seconds between accepted push updates (0 accepts everything).
    #[serde(default, rename = "ws_consider_int_sec")]
    pub min_update_interval_sec: u64,
    /// Sinks receiving this channel's records.
    #[serde(default, rename = "storages")]
    pub sinks: Vec<SinkKind>,
}

impl ChannelInfo {
    /// Create a push channel.
    #[must_use]
    pub fn push(kind: ChannelKind, min_update_interval_sec: u64, sinks: Vec<SinkKind>) -> Self {
        Self {
            kind,
            delivery: DeliveryMode::Push,
            poll_interval_sec: 0,
            min_update_interval_sec,
            sinks,
        }
    }

    /// Create a pull channel.
    #[must_use]
    pub fn pull(kind: ChannelKind, poll_interval_sec: u64, sinks: Vec<SinkKind>) -> Self {
        Self {
            kind,
            delivery: DeliveryMode::Pull,
            poll_interval_sec,
            min_update_interval_sec: 0,
            sinks,
        }
    }
}

/// A venue market and the channels ingested for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    /// Venue symbol, e.g. `BTC-USDT`.
    pub id: String,
    /// Name used when committing records. Defaults to `id`.
    #[serde(default)]
    pub commit_name: Option<String>,
    /// Ordered channel subscriptions.
    #[serde(default, alias = "info")]
    pub channels: Vec<ChannelInfo>,
}

impl Market {
    /// Create a market with the given channels.
    #[must_use]
    pub fn new(id: impl Into<String>, channels: Vec<ChannelInfo>) -> Self {
        Self {
            id: id.into(),
            commit_name: None,
            channels,
        }
    }

    /// Set the commit name.
    #[must_use]
    pub fn with_commit_name(mut self, commit_name: impl Into<String>) -> Self {
        self.commit_name = Some(commit_name.into());
        self
    }

    /// Name under which records of this market are committed.
    #[must_use]
    pub fn commit_name(&self) -> &str {
        match self.commit_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
