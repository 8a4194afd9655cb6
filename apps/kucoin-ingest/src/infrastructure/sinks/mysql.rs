//! MySQL Sink
//!
//! Commits each batch with one multi-row `INSERT` into the `ticker` or
//! `trade` table. Records are stored under their commit name:
//!
//! ```sql
//! CREATE TABLE ticker (
//!     exchange  VARCHAR(32)    NOT NULL,
//!     market    VARCHAR(64)    NOT NULL,
//!     price     DECIMAL(40,20) NOT NULL,
//!     timestamp DATETIME(6)    NOT NULL
//! );
//! CREATE TABLE trade (
//!     exchange  VARCHAR(32)    NOT NULL,
//!     market    VARCHAR(64)    NOT NULL,
//!     trade_id  VARCHAR(64)    NOT NULL,
//!     side      VARCHAR(4)     NOT NULL,
//!     size      DECIMAL(40,20) NOT NULL,
//!     price     DECIMAL(40,20) NOT NULL,
//!     timestamp DATETIME(6)    NOT NULL
//! );
//! ```
//!
//! The pool connects lazily, so an unreachable server surfaces on the
//! first commit rather than at startup.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions};
use sqlx::QueryBuilder;

use crate::application::ports::{Sink, SinkError, TransportError};
use crate::domain::market::SinkKind;
use crate::domain::streaming::{Ticker, Trade};

const MAX_CONNECTIONS: u32 = 4;

/// Sink inserting records into MySQL.
#[derive(Debug, Clone)]
pub struct MySqlSink {
    pool: MySqlPool,
    acquire_timeout: Duration,
}

impl MySqlSink {
    /// Create a sink for `url` without connecting.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Rejected` if the URL cannot be parsed.
    pub fn connect_lazy(url: &str, acquire_timeout: Duration) -> Result<Self, SinkError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .map_err(|err| SinkError::Rejected(format!("invalid mysql url: {err}")))?;
        Ok(Self {
            pool,
            acquire_timeout,
        })
    }

    async fn insert(&self, mut query: QueryBuilder<'_, MySql>, records: usize) -> Result<(), SinkError> {
        query
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| self.sink_error(err))?;

        tracing::debug!(sink = "mysql", records, "insert committed");
        Ok(())
    }

    fn sink_error(&self, err: sqlx::Error) -> SinkError {
        match err {
            sqlx::Error::Database(err) => SinkError::Rejected(err.to_string()),
            sqlx::Error::PoolTimedOut => {
                SinkError::Transport(TransportError::Timeout(self.acquire_timeout))
            }
            other => SinkError::Transport(TransportError::Io(other.to_string())),
        }
    }
}

fn ticker_insert(batch: &[Ticker]) -> QueryBuilder<'_, MySql> {
    let mut query = QueryBuilder::new("INSERT INTO ticker (exchange, market, price, timestamp) ");
    query.push_values(batch, |mut row, ticker| {
        row.push_bind(&ticker.exchange)
            .push_bind(&ticker.commit_name)
            .push_bind(ticker.price)
            .push_bind(ticker.timestamp);
    });
    query
}

fn trade_insert(batch: &[Trade]) -> QueryBuilder<'_, MySql> {
    let mut query = QueryBuilder::new(
        "INSERT INTO trade (exchange, market, trade_id, side, size, price, timestamp) ",
    );
    query.push_values(batch, |mut row, trade| {
        row.push_bind(&trade.exchange)
            .push_bind(&trade.commit_name)
            .push_bind(&trade.trade_id)
            .push_bind(trade.side.as_str())
            .push_bind(trade.size)
            .push_bind(trade.price)
            .push_bind(trade.timestamp);
    });
    query
}

#[async_trait]
impl Sink for MySqlSink {
    fn kind(&self) -> SinkKind {
        SinkKind::MySql
    }

    async fn commit_tickers(&self, batch: Vec<Ticker>) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.insert(ticker_insert(&batch), batch.len()).await
    }

    async fn commit_trades(&self, batch: Vec<Trade>) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.insert(trade_insert(&batch), batch.len()).await
    }
}

// =============================================================================
// Tests
// =============================================================================
