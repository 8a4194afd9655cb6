//! Batching Fan-Out
//!
//! Accumulates normalized records per (sink, record kind) and hands each
//! buffer off once it reaches its configured size. The same component
//! serves the stream reader and the REST pollers; only the outlet differs:
//!
//! - [`QueueOutlet`]: bounded queue per (sink, kind), drained by a delivery task
//! - [`DirectOutlet`]: commits synchronously into the sink
//!
//! Buffers still partially filled when the producer stops are dropped.

use std::collections::HashMap;
use std::mem;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::SinkRegistry;
use crate::domain::market::{ChannelKind, SinkKind};
use crate::domain::streaming::{Batch, Ticker, Trade};

// =============================================================================
// Batch Sizes
// =============================================================================

/// Records per committed batch for one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    /// Tickers per batch.
    pub tickers: usize,
    /// Trades per batch.
    pub trades: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            tickers: 1,
            trades: 1,
        }
    }
}

impl BatchSizes {
    /// Create batch sizes. Zero is raised to one.
    #[must_use]
    pub fn new(tickers: usize, trades: usize) -> Self {
        Self {
            tickers: tickers.max(1),
            trades: trades.max(1),
        }
    }
}

// =============================================================================
// Outlets
// =============================================================================

/// Destination for full batches.
#[async_trait]
pub trait BatchOutlet: Send {
    /// Hand a full batch for `sink` onwards.
    async fn deliver(&mut self, sink: SinkKind, batch: Batch) -> Result<(), PipelineError>;
}

/// Sends batches over bounded queues, one per (sink, kind).
#[derive(Debug)]
pub struct QueueOutlet {
    senders: HashMap<(SinkKind, ChannelKind), mpsc::Sender<Batch>>,
    cancel: CancellationToken,
}

impl QueueOutlet {
    /// Create an outlet over the given queues.
    #[must_use]
    pub const fn new(
        senders: HashMap<(SinkKind, ChannelKind), mpsc::Sender<Batch>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { senders, cancel }
    }
}

#[async_trait]
impl BatchOutlet for QueueOutlet {
    async fn deliver(&mut self, sink: SinkKind, batch: Batch) -> Result<(), PipelineError> {
        let kind = batch.kind();
        let Some(sender) = self.senders.get(&(sink, kind)) else {
            return Err(PipelineError::Task(format!(
                "no delivery queue for {sink} {kind} batches"
            )));
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            sent = sender.send(batch) => sent.map_err(|_| PipelineError::Cancelled),
        }
    }
}

/// Commits batches directly into the sink, blocking the producer.
#[derive(Debug)]
pub struct DirectOutlet {
    sinks: SinkRegistry,
    cancel: CancellationToken,
}

impl DirectOutlet {
    /// Create an outlet committing into the registered sinks.
    #[must_use]
    pub const fn new(sinks: SinkRegistry, cancel: CancellationToken) -> Self {
        Self { sinks, cancel }
    }
}

#[async_trait]
impl BatchOutlet for DirectOutlet {
    async fn deliver(&mut self, sink: SinkKind, batch: Batch) -> Result<(), PipelineError> {
        let Some(handle) = self.sinks.get(sink) else {
            return Err(PipelineError::Configuration(format!("sink {sink} is not available")));
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            committed = handle.commit(batch) => {
                committed.map_err(|source| PipelineError::SinkCommit { sink, source })?;
            }
        }

        Ok(())
    }
}

// =============================================================================
// Fan-Out
// =============================================================================

#[derive(Debug)]
struct SinkBuffers {
    sizes: BatchSizes,
    tickers: Vec<Ticker>,
    trades: Vec<Trade>,
}

impl SinkBuffers {
    fn new(sizes: BatchSizes) -> Self {
        Self {
            sizes,
            tickers: Vec::with_capacity(sizes.tickers),
            trades: Vec::with_capacity(sizes.trades),
        }
    }
}

/// Per-producer batching state.
#[derive(Debug)]
pub struct BatchFanOut<O> {
    outlet: O,
    sizes: HashMap<SinkKind, BatchSizes>,
    buffers: HashMap<SinkKind, SinkBuffers>,
}

impl<O: BatchOutlet> BatchFanOut<O> {
    /// Create a fan-out. Sinks without configured sizes batch one record at a time.
    #[must_use]
    pub fn new(outlet: O, sizes: HashMap<SinkKind, BatchSizes>) -> Self {
        Self {
            outlet,
            sizes,
            buffers: HashMap::new(),
        }
    }

    /// Add a ticker to the buffers of every sink in `sinks`.
    ///
    /// # Errors
    ///
    /// Returns the outlet's error if a full batch cannot be handed off.
    pub async fn push_ticker(
        &mut self,
        ticker: &Ticker,
        sinks: &[SinkKind],
    ) -> Result<(), PipelineError> {
        for &sink in sinks {
            let buffers = self.buffers_for(sink);
            let capacity = buffers.sizes.tickers;
            if let Some(full) = stage(&mut buffers.tickers, capacity, ticker.clone()) {
                self.outlet.deliver(sink, Batch::Tickers(full)).await?;
            }
        }
        Ok(())
    }

    /// Add a trade to the buffers of every sink in `sinks`.
    ///
    /// # Errors
    ///
    /// Returns the outlet's error if a full batch cannot be handed off.
    pub async fn push_trade(&mut self, trade: &Trade, sinks: &[SinkKind]) -> Result<(), PipelineError> {
        for &sink in sinks {
            let buffers = self.buffers_for(sink);
            let capacity = buffers.sizes.trades;
            if let Some(full) = stage(&mut buffers.trades, capacity, trade.clone()) {
                self.outlet.deliver(sink, Batch::Trades(full)).await?;
            }
        }
        Ok(())
    }

    /// Records buffered for a sink and kind, not yet handed off.
    #[must_use]
    pub fn pending(&self, sink: SinkKind, kind: ChannelKind) -> usize {
        self.buffers.get(&sink).map_or(0, |buffers| match kind {
            ChannelKind::Ticker => buffers.tickers.len(),
            ChannelKind::Trade => buffers.trades.len(),
        })
    }

    /// Borrow the outlet.
    #[must_use]
    pub const fn outlet(&self) -> &O {
        &self.outlet
    }

    fn buffers_for(&mut self, sink: SinkKind) -> &mut SinkBuffers {
        let sizes = self.sizes.get(&sink).copied().unwrap_or_default();
        self.buffers
            .entry(sink)
            .or_insert_with(|| SinkBuffers::new(sizes))
    }
}

/// Append `record`; when the buffer is full, swap in a fresh one and return the full one.
fn stage<R>(buffer: &mut Vec<R>, capacity: usize, record: R) -> Option<Vec<R>> {
    buffer.push(record);
    (buffer.len() >= capacity).then(|| mem::replace(buffer, Vec::with_capacity(capacity)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::streaming::TradeSide;
    use crate::infrastructure::sinks::MemorySink;

    /// Collects delivered batches.
    #[derive(Debug, Default)]
    struct RecordingOutlet {
        delivered: Vec<(SinkKind, Batch)>,
    }

    #[async_trait]
    impl BatchOutlet for RecordingOutlet {
        async fn deliver(&mut self, sink: SinkKind, batch: Batch) -> Result<(), PipelineError> {
            self.delivered.push((sink, batch));
            Ok(())
        }
    }

    fn trade(id: u32) -> Trade {
        Trade {
            exchange: "kucoin".to_string(),
            market: "BTC-USDT".to_string(),
            commit_name: "BTC-USDT".to_string(),
            trade_id: id.to_string(),
            side: TradeSide::Buy,
            size: Decimal::new(1, 2),
            price: Decimal::new(34_000, 0),
            timestamp: Utc.timestamp_opt(1_625_000_000, 0).unwrap(),
        }
    }

    fn ticker(price: i64) -> Ticker {
        Ticker {
            exchange: "kucoin".to_string(),
            market: "BTC-USDT".to_string(),
            commit_name: "BTC-USDT".to_string(),
            price: Decimal::new(price, 0),
            timestamp: Utc.timestamp_opt(1_625_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn flushes_exactly_one_full_batch_in_order() {
        let sizes = HashMap::from([(SinkKind::Terminal, BatchSizes::new(1, 3))]);
        let mut fanout = BatchFanOut::new(RecordingOutlet::default(), sizes);

        for id in 1..=2 {
            fanout.push_trade(&trade(id), &[SinkKind::Terminal]).await.unwrap();
        }
        assert!(fanout.outlet().delivered.is_empty());
        assert_eq!(fanout.pending(SinkKind::Terminal, ChannelKind::Trade), 2);

        fanout.push_trade(&trade(3), &[SinkKind::Terminal]).await.unwrap();

        assert_eq!(fanout.outlet().delivered.len(), 1);
        let (sink, batch) = &fanout.outlet().delivered[0];
        assert_eq!(*sink, SinkKind::Terminal);
        let Batch::Trades(trades) = batch else {
            panic!("expected trades");
        };
        let ids: Vec<_> = trades.iter().map(|t| t.trade_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(fanout.pending(SinkKind::Terminal, ChannelKind::Trade), 0);
    }

    #[tokio::test]
    async fn records_after_flush_start_a_fresh_buffer() {
        let sizes = HashMap::from([(SinkKind::Terminal, BatchSizes::new(2, 2))]);
        let mut fanout = BatchFanOut::new(RecordingOutlet::default(), sizes);

        for price in 1..=3 {
            fanout.push_ticker(&ticker(price), &[SinkKind::Terminal]).await.unwrap();
        }

        assert_eq!(fanout.outlet().delivered.len(), 1);
        assert_eq!(fanout.outlet().delivered[0].1.len(), 2);
        assert_eq!(fanout.pending(SinkKind::Terminal, ChannelKind::Ticker), 1);
    }

    #[tokio::test]
    async fn fans_out_only_to_configured_sinks() {
        let sizes = HashMap::from([
            (SinkKind::Terminal, BatchSizes::new(1, 1)),
            (SinkKind::ElasticSearch, BatchSizes::new(1, 1)),
        ]);
        let mut fanout = BatchFanOut::new(RecordingOutlet::default(), sizes);

        fanout.push_trade(&trade(7), &[SinkKind::ElasticSearch]).await.unwrap();

        let delivered = &fanout.outlet().delivered;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, SinkKind::ElasticSearch);
        assert_eq!(fanout.pending(SinkKind::Terminal, ChannelKind::Trade), 0);
    }

    #[tokio::test]
    async fn ticker_and_trade_buffers_are_separate() {
        let sizes = HashMap::from([(SinkKind::Terminal, BatchSizes::new(2, 2))]);
        let mut fanout = BatchFanOut::new(RecordingOutlet::default(), sizes);

        fanout.push_ticker(&ticker(1), &[SinkKind::Terminal]).await.unwrap();
        fanout.push_trade(&trade(1), &[SinkKind::Terminal]).await.unwrap();

        assert!(fanout.outlet().delivered.is_empty());
        assert_eq!(fanout.pending(SinkKind::Terminal, ChannelKind::Ticker), 1);
        assert_eq!(fanout.pending(SinkKind::Terminal, ChannelKind::Trade), 1);
    }

    #[tokio::test]
    async fn queue_outlet_send_aborts_on_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let senders = HashMap::from([((SinkKind::Terminal, ChannelKind::Trade), tx.clone())]);
        let mut outlet = QueueOutlet::new(senders, cancel.clone());

        // Fill the queue so the next send blocks.
        tx.send(Batch::Trades(vec![trade(0)])).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            outlet.deliver(SinkKind::Terminal, Batch::Trades(vec![trade(1)])),
        )
        .await
        .expect("blocked send should observe cancellation");
        assert_eq!(result, Err(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn queue_outlet_rejects_missing_queue() {
        let mut outlet = QueueOutlet::new(HashMap::new(), CancellationToken::new());
        let result = outlet
            .deliver(SinkKind::Terminal, Batch::Tickers(vec![ticker(1)]))
            .await;
        assert!(matches!(result, Err(PipelineError::Task(_))));
    }

    #[tokio::test]
    async fn direct_outlet_commits_into_sink() {
        let sink = Arc::new(MemorySink::new(SinkKind::Terminal));
        let registry = SinkRegistry::new().with(sink.clone());
        let outlet = DirectOutlet::new(registry, CancellationToken::new());
        let sizes = HashMap::from([(SinkKind::Terminal, BatchSizes::new(2, 2))]);
        let mut fanout = BatchFanOut::new(outlet, sizes);

        fanout.push_ticker(&ticker(1), &[SinkKind::Terminal]).await.unwrap();
        fanout.push_ticker(&ticker(2), &[SinkKind::Terminal]).await.unwrap();

        assert_eq!(sink.ticker_batches(), vec![vec![ticker(1), ticker(2)]]);
    }

    #[tokio::test]
    async fn direct_outlet_surfaces_commit_failure() {
        let sink = Arc::new(MemorySink::failing(SinkKind::ElasticSearch, "index closed"));
        let registry = SinkRegistry::new().with(sink);
        let mut outlet = DirectOutlet::new(registry, CancellationToken::new());

        let result = outlet
            .deliver(SinkKind::ElasticSearch, Batch::Trades(vec![trade(1)]))
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::SinkCommit {
                sink: SinkKind::ElasticSearch,
                ..
            })
        ));
    }
}
