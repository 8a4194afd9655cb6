//! REST Poller
//!
//! One instance per pull subscription. Each tick fetches a level-1
//! snapshot (ticker) or the most recent trades (trade), normalizes them and
//! commits through the fan-out synchronously: a slow sink stalls only this
//! poller.
//!
//! Polling trades is inherently lossy or redundant. An interval much larger
//! than the market's trade frequency leaves gaps between the returned
//! windows; a much smaller one returns the same trades again. Prefer push
//! delivery wherever the venue offers it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::{RestClient, RestRequest, RestResponse, TransportError};
use crate::application::services::fanout::{BatchFanOut, BatchOutlet};
use crate::domain::market::{ChannelKind, SinkKind};
use crate::domain::subscription::{SubscriptionKey, SubscriptionState};
use crate::infrastructure::kucoin::messages::{RestTickerResponse, RestTradesResponse, SUCCESS_CODE};
use crate::infrastructure::kucoin::normalizer::{self, Origin};
use crate::infrastructure::metrics;

/// Periodic fetcher for one pull subscription.
pub struct RestPoller<O> {
    rest: Arc<dyn RestClient>,
    request: RestRequest,
    market: String,
    kind: ChannelKind,
    commit_name: String,
    sinks: Vec<SinkKind>,
    interval: Duration,
    fanout: BatchFanOut<O>,
}

impl<O: BatchOutlet> RestPoller<O> {
    /// Create a poller; the request is built once here and reused.
    #[must_use]
    pub fn new(
        rest: Arc<dyn RestClient>,
        rest_base_url: &str,
        key: &SubscriptionKey,
        state: &SubscriptionState,
        fanout: BatchFanOut<O>,
    ) -> Self {
        let path = match key.channel {
            ChannelKind::Ticker => "market/orderbook/level1",
            ChannelKind::Trade => "market/histories",
        };
        let request =
            RestRequest::get(format!("{rest_base_url}{path}")).query("symbol", key.market.clone());

        Self {
            rest,
            request,
            market: key.market.clone(),
            kind: key.channel,
            commit_name: state.commit_name.clone(),
            sinks: state.sinks.clone(),
            interval: state.poll_interval,
            fanout,
        }
    }

    /// Poll on every tick until cancelled or a poll fails. The first poll
    /// happens one interval after start.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` on shutdown, or the first poll error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let period = self.interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            exchange = "kucoin",
            market = %self.market,
            channel = %self.kind,
            interval_secs = period.as_secs(),
            "poller started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.poll_once(&cancel).await {
                if err != PipelineError::Cancelled {
                    tracing::error!(
                        exchange = "kucoin",
                        market = %self.market,
                        channel = %self.kind,
                        error = %err,
                        "poll failed"
                    );
                }
                return Err(err);
            }
        }
    }

    /// Execute the request once and feed every record to the fan-out.
    /// Returns the number of records normalized.
    ///
    /// # Errors
    ///
    /// Returns `Transport`, `Protocol` or `Decode` for a failed poll, or the
    /// fan-out's error.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<usize, PipelineError> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            response = self.rest.execute(&self.request) => response?,
        };
        if !response.is_success() {
            return Err(PipelineError::Transport(TransportError::Http {
                status: response.status,
                url: self.request.url.clone(),
            }));
        }

        let origin = Origin {
            market: &self.market,
            commit_name: &self.commit_name,
        };
        let count = match self.kind {
            ChannelKind::Ticker => {
                let body: RestTickerResponse = decode(&response)?;
                check_code(body.code.as_deref())?;
                let Some(data) = body.data else {
                    return Err(PipelineError::Decode(format!(
                        "no ticker data for {}",
                        self.market
                    )));
                };
                let ticker = normalizer::pull_ticker(origin, &data, Utc::now())?;
                self.fanout.push_ticker(&ticker, &self.sinks).await?;
                1
            }
            ChannelKind::Trade => {
                let body: RestTradesResponse = decode(&response)?;
                check_code(body.code.as_deref())?;
                let trades = body
                    .data
                    .iter()
                    .map(|data| normalizer::pull_trade(origin, data))
                    .collect::<Result<Vec<_>, _>>()?;
                for trade in &trades {
                    self.fanout.push_trade(trade, &self.sinks).await?;
                }
                trades.len()
            }
        };

        metrics::record_message_received(self.kind);
        Ok(count)
    }

    /// Borrow the fan-out.
    #[must_use]
    pub const fn fanout(&self) -> &BatchFanOut<O> {
        &self.fanout
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: &RestResponse) -> Result<T, PipelineError> {
    response
        .json()
        .map_err(|err| PipelineError::Decode(format!("REST response: {err}")))
}

fn check_code(code: Option<&str>) -> Result<(), PipelineError> {
    match code {
        Some(code) if code != SUCCESS_CODE => {
            Err(PipelineError::Protocol(format!("REST response code {code}")))
        }
        _ => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal::Decimal;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::application::ports::SinkRegistry;
    use crate::application::services::fanout::{BatchSizes, DirectOutlet};
    use crate::domain::market::{ChannelInfo, Market};
    use crate::domain::subscription::ConfigIndex;
    use crate::infrastructure::sinks::MemorySink;
    use crate::infrastructure::transport::HttpRestClient;

    fn poller(
        server: &MockServer,
        channel: ChannelKind,
        sink: Arc<MemorySink>,
        batch: usize,
    ) -> RestPoller<DirectOutlet> {
        let index = ConfigIndex::build(&[Market::new(
            "BTC-USDT",
            vec![ChannelInfo::pull(channel, 5, vec![SinkKind::Terminal])],
        )])
        .unwrap();
        let key = SubscriptionKey::new("BTC-USDT", channel);
        let state = index.get(&key).unwrap();

        let outlet = DirectOutlet::new(SinkRegistry::new().with(sink), CancellationToken::new());
        let fanout = BatchFanOut::new(
            outlet,
            HashMap::from([(SinkKind::Terminal, BatchSizes::new(batch, batch))]),
        );
        let rest = Arc::new(HttpRestClient::new(Duration::from_secs(5)).unwrap());
        RestPoller::new(rest, &format!("{}/api/v1/", server.uri()), &key, state, fanout)
    }

    #[tokio::test]
    async fn polls_ticker_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/market/orderbook/level1"))
            .and(query_param("symbol", "BTC-USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "200000",
                "data": {"time": 1_625_000_000_000_i64, "sequence": "1", "price": "34000.1", "size": "0.1"}
            })))
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::new(SinkKind::Terminal));
        let mut poller = poller(&server, ChannelKind::Ticker, sink.clone(), 1);

        assert_eq!(poller.poll_once(&CancellationToken::new()).await.unwrap(), 1);
        let tickers = sink.tickers();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].price, Decimal::new(340_001, 1));
        assert_eq!(tickers[0].timestamp.timestamp_millis(), 1_625_000_000_000);
    }

    #[tokio::test]
    async fn polls_trade_history_with_float_times() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/market/histories"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":"200000","data":[
                    {"sequence":"1","price":"0.07","size":"0.004","side":"buy","time":1625000000000000000.0},
                    {"sequence":"2","price":"0.08","size":"0.005","side":"sell","time":1625000001000000000}
                ]}"#,
            ))
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::new(SinkKind::Terminal));
        let mut poller = poller(&server, ChannelKind::Trade, sink.clone(), 2);

        assert_eq!(poller.poll_once(&CancellationToken::new()).await.unwrap(), 2);
        let batches = sink.trade_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].timestamp.timestamp(), 1_625_000_000);
        assert_eq!(batches[0][1].timestamp.timestamp(), 1_625_000_001);
    }

    #[tokio::test]
    async fn http_failure_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::new(SinkKind::Terminal));
        let mut poller = poller(&server, ChannelKind::Ticker, sink, 1);
        let err = poller.poll_once(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Transport(TransportError::Http { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn venue_error_code_is_a_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": "400100", "msg": "bad symbol"})),
            )
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::new(SinkKind::Terminal));
        let mut poller = poller(&server, ChannelKind::Trade, sink, 1);
        let err = poller.poll_once(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, PipelineError::Protocol("REST response code 400100".into()));
    }

    #[tokio::test]
    async fn string_time_from_rest_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":"200000","data":[{"price":"1","size":"1","side":"buy","time":"1625000000000000000"}]}"#,
            ))
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::new(SinkKind::Terminal));
        let mut poller = poller(&server, ChannelKind::Trade, sink.clone(), 1);
        let err = poller.poll_once(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(sink.trades().is_empty());
    }
}
