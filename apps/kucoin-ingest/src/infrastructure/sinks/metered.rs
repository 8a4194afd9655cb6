//! Metered Sink
//!
//! Decorator counting committed batches and records per sink. Failed
//! commits are not counted.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::{Sink, SinkError, SinkRegistry};
use crate::domain::market::{ChannelKind, SinkKind};
use crate::domain::streaming::{Ticker, Trade};
use crate::infrastructure::metrics;

/// Sink recording commit metrics around an inner sink.
pub struct MeteredSink {
    inner: Arc<dyn Sink>,
}

impl std::fmt::Debug for MeteredSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredSink")
            .field("sink", &self.inner.kind())
            .finish()
    }
}

impl MeteredSink {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Sink>) -> Self {
        Self { inner }
    }
}

/// Wrap every sink of `registry` in a [`MeteredSink`].
#[must_use]
pub fn metered(registry: &SinkRegistry) -> SinkRegistry {
    registry
        .kinds()
        .filter_map(|kind| registry.get(kind))
        .fold(SinkRegistry::new(), |metered, sink| {
            metered.with(Arc::new(MeteredSink::new(sink)))
        })
}

#[async_trait]
impl Sink for MeteredSink {
    fn kind(&self) -> SinkKind {
        self.inner.kind()
    }

    async fn commit_tickers(&self, batch: Vec<Ticker>) -> Result<(), SinkError> {
        let len = batch.len();
        self.inner.commit_tickers(batch).await?;
        metrics::record_batch_committed(self.kind(), ChannelKind::Ticker, len);
        Ok(())
    }

    async fn commit_trades(&self, batch: Vec<Trade>) -> Result<(), SinkError> {
        let len = batch.len();
        self.inner.commit_trades(batch).await?;
        metrics::record_batch_committed(self.kind(), ChannelKind::Trade, len);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::streaming::Batch;
    use crate::infrastructure::sinks::MemorySink;

    fn ticker() -> Ticker {
        Ticker {
            exchange: "kucoin".to_string(),
            market: "BTC-USDT".to_string(),
            commit_name: "BTC-USDT".to_string(),
            price: Decimal::new(34_000, 0),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commits_reach_the_inner_sink() {
        let inner = Arc::new(MemorySink::new(SinkKind::Terminal));
        let sink = MeteredSink::new(inner.clone());

        assert_eq!(sink.kind(), SinkKind::Terminal);
        sink.commit(Batch::Tickers(vec![ticker(), ticker()])).await.unwrap();

        assert_eq!(inner.tickers().len(), 2);
    }

    #[tokio::test]
    async fn inner_failure_is_returned() {
        let inner = Arc::new(MemorySink::failing(SinkKind::ElasticSearch, "mapping conflict"));
        let sink = MeteredSink::new(inner.clone());

        let result = sink.commit_tickers(vec![ticker()]).await;

        assert_eq!(result, Err(SinkError::Rejected("mapping conflict".into())));
        assert!(inner.tickers().is_empty());
    }

    #[test]
    fn metered_registry_keeps_every_kind() {
        let registry = SinkRegistry::new()
            .with(Arc::new(MemorySink::new(SinkKind::Terminal)))
            .with(Arc::new(MemorySink::new(SinkKind::ElasticSearch)));

        let metered = metered(&registry);

        let mut kinds: Vec<_> = metered.kinds().collect();
        kinds.sort();
        assert_eq!(kinds, vec![SinkKind::Terminal, SinkKind::ElasticSearch]);
        assert_eq!(metered.get(SinkKind::Terminal).unwrap().kind(), SinkKind::Terminal);
    }
}
