//! Sink Port (Driven Port)
//!
//! Interface for storage systems that persist committed batches.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::TransportError;
use crate::domain::market::SinkKind;
use crate::domain::streaming::{Batch, Ticker, Trade};

/// Sink commit error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The storage system rejected the batch.
    #[error("batch rejected: {0}")]
    Rejected(String),

    /// The batch could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The storage system could not be reached.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A storage system receiving batches of canonical records.
///
/// Fire-and-forget sinks always return `Ok`.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Which sink this is.
    fn kind(&self) -> SinkKind;

    /// Commit a batch of tickers.
    async fn commit_tickers(&self, batch: Vec<Ticker>) -> Result<(), SinkError>;

    /// Commit a batch of trades.
    async fn commit_trades(&self, batch: Vec<Trade>) -> Result<(), SinkError>;

    /// Commit a batch of either kind.
    async fn commit(&self, batch: Batch) -> Result<(), SinkError> {
        match batch {
            Batch::Tickers(tickers) => self.commit_tickers(tickers).await,
            Batch::Trades(trades) => self.commit_trades(trades).await,
        }
    }
}

/// The process-wide sink handles, one per sink kind.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: HashMap<SinkKind, Arc<dyn Sink>>,
}

impl SinkRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink under its own kind, replacing any previous one.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.insert(sink.kind(), sink);
        self
    }

    /// Get the handle for a sink kind.
    #[must_use]
    pub fn get(&self, kind: SinkKind) -> Option<Arc<dyn Sink>> {
        self.sinks.get(&kind).cloned()
    }

    /// Registered sink kinds.
    pub fn kinds(&self) -> impl Iterator<Item = SinkKind> + '_ {
        self.sinks.keys().copied()
    }
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.kinds().collect();
        kinds.sort();
        f.debug_struct("SinkRegistry").field("sinks", &kinds).finish()
    }
}
