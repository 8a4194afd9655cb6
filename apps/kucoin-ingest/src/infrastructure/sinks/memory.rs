//! In-Memory Sink
//!
//! Keeps every committed batch for inspection. Can be set to reject all
//! commits to exercise failure paths.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{Sink, SinkError};
use crate::domain::market::SinkKind;
use crate::domain::streaming::{Ticker, Trade};

/// Recording sink.
#[derive(Debug)]
pub struct MemorySink {
    kind: SinkKind,
    failure: Option<String>,
    tickers: Mutex<Vec<Vec<Ticker>>>,
    trades: Mutex<Vec<Vec<Trade>>>,
}

impl MemorySink {
    /// Sink that accepts every batch, registered as `kind`.
    #[must_use]
    pub fn new(kind: SinkKind) -> Self {
        Self {
            kind,
            failure: None,
            tickers: Mutex::new(Vec::new()),
            trades: Mutex::new(Vec::new()),
        }
    }

    /// Sink that rejects every batch with `message`.
    #[must_use]
    pub fn failing(kind: SinkKind, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(kind)
        }
    }

    /// Committed ticker batches, in commit order.
    #[must_use]
    pub fn ticker_batches(&self) -> Vec<Vec<Ticker>> {
        self.tickers.lock().clone()
    }

    /// Committed trade batches, in commit order.
    #[must_use]
    pub fn trade_batches(&self) -> Vec<Vec<Trade>> {
        self.trades.lock().clone()
    }

    /// All committed tickers.
    #[must_use]
    pub fn tickers(&self) -> Vec<Ticker> {
        self.tickers.lock().iter().flatten().cloned().collect()
    }

    /// All committed trades.
    #[must_use]
    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().iter().flatten().cloned().collect()
    }

    fn check(&self) -> Result<(), SinkError> {
        self.failure
            .as_ref()
            .map_or(Ok(()), |message| Err(SinkError::Rejected(message.clone())))
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn commit_tickers(&self, batch: Vec<Ticker>) -> Result<(), SinkError> {
        self.check()?;
        self.tickers.lock().push(batch);
        Ok(())
    }

    async fn commit_trades(&self, batch: Vec<Trade>) -> Result<(), SinkError> {
        self.check()?;
        self.trades.lock().push(batch);
        Ok(())
    }
}
