//! Elasticsearch Sink
//!
//! Commits each batch with one `_bulk` request. Every record becomes an
//! `index` action followed by its document:
//!
//! ```text
//! {"index":{"_index":"kucoin-ingest"}}
//! {"type":"ticker","exchange":"kucoin","market":"BTC_USDT","price":34000.1,"timestamp":"2021-06-29T20:53:20Z"}
//! ```
//!
//! A non-2xx response or a body reporting `"errors": true` rejects the
//! whole batch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::application::ports::{RestClient, RestRequest, Sink, SinkError};
use crate::domain::market::SinkKind;
use crate::domain::streaming::{Ticker, Trade};

/// Elasticsearch connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticSearchTarget {
    /// Cluster URL, without trailing slash.
    pub url: String,
    /// Index the documents are written to.
    pub index_name: String,
}

/// Sink writing documents through the bulk API.
pub struct ElasticSearchSink {
    rest: Arc<dyn RestClient>,
    target: ElasticSearchTarget,
}

impl std::fmt::Debug for ElasticSearchSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticSearchSink")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct IndexAction<'a> {
    index: IndexTarget<'a>,
}

#[derive(Serialize)]
struct IndexTarget<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
}

#[derive(Serialize)]
struct TickerDoc<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    exchange: &'a str,
    market: &'a str,
    price: f64,
    timestamp: String,
}

#[derive(Serialize)]
struct TradeDoc<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    exchange: &'a str,
    market: &'a str,
    trade_id: &'a str,
    side: &'static str,
    size: f64,
    price: f64,
    timestamp: String,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
}

impl ElasticSearchSink {
    /// Create a sink.
    #[must_use]
    pub fn new(rest: Arc<dyn RestClient>, mut target: ElasticSearchTarget) -> Self {
        while target.url.ends_with('/') {
            target.url.pop();
        }
        Self { rest, target }
    }

    fn bulk_body<T: Serialize>(&self, docs: impl Iterator<Item = T>) -> Result<String, SinkError> {
        let action = serde_json::to_string(&IndexAction {
            index: IndexTarget {
                index: &self.target.index_name,
            },
        })
        .map_err(|err| SinkError::Encode(err.to_string()))?;

        let mut body = String::new();
        for doc in docs {
            let doc = serde_json::to_string(&doc).map_err(|err| SinkError::Encode(err.to_string()))?;
            body.push_str(&action);
            body.push('\n');
            body.push_str(&doc);
            body.push('\n');
        }
        Ok(body)
    }

    async fn bulk(&self, body: String, records: usize) -> Result<(), SinkError> {
        let request = RestRequest::post(format!("{}/_bulk", self.target.url))
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        let response = self.rest.execute(&request).await?;

        if !response.is_success() {
            return Err(SinkError::Rejected(format!(
                "bulk request returned status {}",
                response.status
            )));
        }
        let result: BulkResponse = response
            .json()
            .map_err(|err| SinkError::Rejected(format!("bulk response: {err}")))?;
        if result.errors {
            return Err(SinkError::Rejected("bulk response reported item errors".into()));
        }

        tracing::debug!(sink = "elastic_search", index = %self.target.index_name, records, "bulk committed");
        Ok(())
    }
}

fn to_f64(field: &'static str, value: Decimal) -> Result<f64, SinkError> {
    value
        .to_f64()
        .ok_or_else(|| SinkError::Encode(format!("{field} {value} does not fit a double")))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[async_trait]
impl Sink for ElasticSearchSink {
    fn kind(&self) -> SinkKind {
        SinkKind::ElasticSearch
    }

    async fn commit_tickers(&self, batch: Vec<Ticker>) -> Result<(), SinkError> {
        let docs = batch
            .iter()
            .map(|ticker| {
                Ok(TickerDoc {
                    kind: "ticker",
                    exchange: &ticker.exchange,
                    market: &ticker.commit_name,
                    price: to_f64("price", ticker.price)?,
                    timestamp: timestamp(ticker.timestamp),
                })
            })
            .collect::<Result<Vec<_>, SinkError>>()?;
        let body = self.bulk_body(docs.into_iter())?;
        self.bulk(body, batch.len()).await
    }

    async fn commit_trades(&self, batch: Vec<Trade>) -> Result<(), SinkError> {
        let docs = batch
            .iter()
            .map(|trade| {
                Ok(TradeDoc {
                    kind: "trade",
                    exchange: &trade.exchange,
                    market: &trade.commit_name,
                    trade_id: &trade.trade_id,
                    side: trade.side.as_str(),
                    size: to_f64("size", trade.size)?,
                    price: to_f64("price", trade.price)?,
                    timestamp: timestamp(trade.timestamp),
                })
            })
            .collect::<Result<Vec<_>, SinkError>>()?;
        let body = self.bulk_body(docs.into_iter())?;
        self.bulk(body, batch.len()).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::application::ports::TransportError;
    use crate::domain::streaming::TradeSide;
    use crate::infrastructure::transport::HttpRestClient;

    fn sink(server: &MockServer) -> ElasticSearchSink {
        let rest = Arc::new(HttpRestClient::new(Duration::from_secs(5)).unwrap());
        ElasticSearchSink::new(
            rest,
            ElasticSearchTarget {
                url: format!("{}/", server.uri()),
                index_name: "market-data".to_string(),
            },
        )
    }

    fn ticker() -> Ticker {
        Ticker {
            exchange: "kucoin".to_string(),
            market: "BTC-USDT".to_string(),
            commit_name: "BTC_USDT".to_string(),
            price: Decimal::new(340_001, 1),
            timestamp: Utc.timestamp_opt(1_625_000_000, 0).unwrap(),
        }
    }

    fn trade() -> Trade {
        Trade {
            exchange: "kucoin".to_string(),
            market: "BTC-USDT".to_string(),
            commit_name: "BTC_USDT".to_string(),
            trade_id: "t1".to_string(),
            side: TradeSide::Buy,
            size: Decimal::new(25, 2),
            price: Decimal::new(34_000, 0),
            timestamp: Utc.timestamp_opt(1_625_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn writes_ndjson_bulk_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"errors": false, "items": []})))
            .expect(1)
            .mount(&server)
            .await;

        sink(&server).commit_tickers(vec![ticker(), ticker()]).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], serde_json::json!({"index": {"_index": "market-data"}}));
        assert_eq!(
            lines[1],
            serde_json::json!({
                "type": "ticker",
                "exchange": "kucoin",
                "market": "BTC_USDT",
                "price": 34000.1,
                "timestamp": "2021-06-29T20:53:20Z"
            })
        );
    }

    #[tokio::test]
    async fn trade_documents_carry_side_and_size() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"errors": false})))
            .mount(&server)
            .await;

        sink(&server).commit_trades(vec![trade()]).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        let doc: serde_json::Value = serde_json::from_str(body.lines().nth(1).unwrap()).unwrap();
        assert_eq!(doc["side"], "buy");
        assert_eq!(doc["size"], 0.25);
        assert_eq!(doc["trade_id"], "t1");
    }

    #[tokio::test]
    async fn item_errors_reject_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"errors": true})))
            .mount(&server)
            .await;

        let err = sink(&server).commit_trades(vec![trade()]).await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected(_)));
    }

    #[tokio::test]
    async fn error_status_rejects_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = sink(&server).commit_tickers(vec![ticker()]).await.unwrap_err();
        assert_eq!(err, SinkError::Rejected("bulk request returned status 503".into()));
    }

    #[tokio::test]
    async fn unreachable_cluster_is_a_transport_error() {
        let rest = Arc::new(HttpRestClient::new(Duration::from_secs(2)).unwrap());
        let sink = ElasticSearchSink::new(
            rest,
            ElasticSearchTarget {
                url: "http://127.0.0.1:1".to_string(),
                index_name: "market-data".to_string(),
            },
        );
        let err = sink.commit_tickers(vec![ticker()]).await.unwrap_err();
        assert!(matches!(err, SinkError::Transport(TransportError::Io(_))));
    }
}
