//! Terminal Sink
//!
//! Prints one line per record through Tokio's async stdout. Committing
//! never fails: a broken writer is logged and the batch is discarded.

use std::fmt::Write as _;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::application::ports::{Sink, SinkError};
use crate::domain::market::SinkKind;
use crate::domain::streaming::{Ticker, Trade};

type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Fire-and-forget sink writing to stdout.
pub struct TerminalSink {
    out: Mutex<Output>,
}

impl std::fmt::Debug for TerminalSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSink").finish_non_exhaustive()
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::stdout()
    }
}

impl TerminalSink {
    /// Sink printing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    /// Sink printing to any async writer.
    #[must_use]
    pub fn with_writer(out: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    async fn emit(&self, lines: impl Iterator<Item = String>) {
        let mut text = String::new();
        for line in lines {
            let _ = writeln!(text, "{line}");
        }

        let mut out = self.out.lock().await;
        let written = match out.write_all(text.as_bytes()).await {
            Ok(()) => out.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            tracing::warn!(sink = "terminal", error = %err, "terminal write failed");
        }
    }
}

fn ticker_line(ticker: &Ticker) -> String {
    format!(
        "{:<8} {:<8} {:<14} price={} at={}",
        "ticker",
        ticker.exchange,
        ticker.commit_name,
        ticker.price,
        ticker.timestamp.to_rfc3339()
    )
}

fn trade_line(trade: &Trade) -> String {
    format!(
        "{:<8} {:<8} {:<14} side={} size={} price={} at={}",
        "trade",
        trade.exchange,
        trade.commit_name,
        trade.side.as_str(),
        trade.size,
        trade.price,
        trade.timestamp.to_rfc3339()
    )
}

#[async_trait]
impl Sink for TerminalSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Terminal
    }

    async fn commit_tickers(&self, batch: Vec<Ticker>) -> Result<(), SinkError> {
        self.emit(batch.iter().map(ticker_line)).await;
        Ok(())
    }

    async fn commit_trades(&self, batch: Vec<Trade>) -> Result<(), SinkError> {
        self.emit(batch.iter().map(trade_line)).await;
        Ok(())
    }
}
