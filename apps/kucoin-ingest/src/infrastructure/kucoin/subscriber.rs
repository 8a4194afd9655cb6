//! Rate-Limited Subscriber
//!
//! Registers every push subscription on the open stream, in configuration
//! order. The venue caps subscribe requests per window, so after each
//! `burst` requests the subscriber pauses for `cooldown` before sending
//! more. Acks are read by the stream reader, not awaited here.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::StreamHandle;
use crate::domain::market::DeliveryMode;
use crate::domain::subscription::ConfigIndex;
use crate::infrastructure::kucoin::codec::{encode_subscribe, topic_for};
use crate::infrastructure::metrics;

/// Subscribe request pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeRateLimit {
    /// Requests sent back to back before pausing.
    pub burst: usize,
    /// Pause between bursts.
    pub cooldown: Duration,
}

impl Default for SubscribeRateLimit {
    fn default() -> Self {
        Self {
            burst: 89,
            cooldown: Duration::from_secs(20),
        }
    }
}

/// What one subscriber run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeReport {
    /// Subscribe requests written.
    pub sent: usize,
    /// Cooldown pauses taken.
    pub pauses: usize,
}

/// Sends subscribe requests for the push subscriptions of an index.
pub struct Subscriber {
    stream: Arc<dyn StreamHandle>,
    index: Arc<ConfigIndex>,
    limit: SubscribeRateLimit,
}

impl Subscriber {
    /// Create a subscriber.
    #[must_use]
    pub fn new(stream: Arc<dyn StreamHandle>, index: Arc<ConfigIndex>, limit: SubscribeRateLimit) -> Self {
        Self {
            stream,
            index,
            limit,
        }
    }

    /// Send all subscribe requests.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` on shutdown and `Transport` on a failed write.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SubscribeReport, PipelineError> {
        let burst = self.limit.burst.max(1);
        let pending: Vec<_> = self.index.with_delivery(DeliveryMode::Push).collect();
        let total = pending.len();
        let mut report = SubscribeReport::default();

        for (key, state) in pending {
            if report.sent > 0 && report.sent % burst == 0 {
                tracing::info!(
                    exchange = "kucoin",
                    sent = report.sent,
                    remaining = total - report.sent,
                    cooldown_secs = self.limit.cooldown.as_secs(),
                    "subscribe burst limit reached, pausing"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    () = tokio::time::sleep(self.limit.cooldown) => {}
                }
                report.pauses += 1;
            }

            let frame = encode_subscribe(state.id, &topic_for(key.channel, &key.market))?;
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                written = self.stream.write(frame) => written?,
            }
            report.sent += 1;
            tracing::debug!(exchange = "kucoin", id = state.id, subscription = %key, "subscribe sent");
        }

        metrics::set_subscriptions(report.sent);
        tracing::info!(
            exchange = "kucoin",
            subscriptions = report.sent,
            pauses = report.pauses,
            "subscriptions sent"
        );
        Ok(report)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{ChannelInfo, ChannelKind, Market, SinkKind};
    use crate::infrastructure::transport::MemoryStream;

    fn index(markets: usize) -> Arc<ConfigIndex> {
        let markets: Vec<_> = (0..markets)
            .map(|n| {
                Market::new(
                    format!("M{n}-USDT"),
                    vec![
                        ChannelInfo::push(ChannelKind::Ticker, 0, vec![SinkKind::Terminal]),
                        ChannelInfo::push(ChannelKind::Trade, 0, vec![SinkKind::Terminal]),
                    ],
                )
            })
            .collect();
        Arc::new(ConfigIndex::build(&markets).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn sends_in_configuration_order() {
        let (stream, remote) = MemoryStream::pair();
        let subscriber = Subscriber::new(stream, index(2), SubscribeRateLimit::default());

        let report = subscriber.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, SubscribeReport { sent: 4, pauses: 0 });

        let topics: Vec<String> = remote
            .written()
            .iter()
            .map(|frame| {
                let value: serde_json::Value = serde_json::from_str(frame).unwrap();
                value["topic"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(
            topics,
            vec![
                "/market/ticker:M0-USDT",
                "/market/match:M0-USDT",
                "/market/ticker:M1-USDT",
                "/market/match:M1-USDT",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn two_hundred_subscriptions_pause_twice() {
        let (stream, remote) = MemoryStream::pair();
        let subscriber = Subscriber::new(stream, index(100), SubscribeRateLimit::default());

        let started = tokio::time::Instant::now();
        let report = subscriber.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report, SubscribeReport { sent: 200, pauses: 2 });
        assert_eq!(remote.written().len(), 200);
        assert!(started.elapsed() >= Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn exact_burst_does_not_pause() {
        let (stream, _remote) = MemoryStream::pair();
        let limit = SubscribeRateLimit {
            burst: 4,
            cooldown: Duration::from_secs(20),
        };
        let subscriber = Subscriber::new(stream, index(2), limit);

        let report = subscriber.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, SubscribeReport { sent: 4, pauses: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_cooldown() {
        let (stream, remote) = MemoryStream::pair();
        let limit = SubscribeRateLimit {
            burst: 1,
            cooldown: Duration::from_secs(3600),
        };
        let subscriber = Subscriber::new(stream, index(1), limit);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        assert_eq!(subscriber.run(&cancel).await, Err(PipelineError::Cancelled));
        assert_eq!(remote.written().len(), 1);
    }

    #[tokio::test]
    async fn pull_subscriptions_are_not_sent() {
        let markets = vec![Market::new(
            "BTC-USDT",
            vec![
                ChannelInfo::pull(ChannelKind::Ticker, 5, vec![SinkKind::Terminal]),
                ChannelInfo::push(ChannelKind::Trade, 0, vec![SinkKind::Terminal]),
            ],
        )];
        let (stream, remote) = MemoryStream::pair();
        let subscriber = Subscriber::new(
            stream,
            Arc::new(ConfigIndex::build(&markets).unwrap()),
            SubscribeRateLimit::default(),
        );

        subscriber.run(&CancellationToken::new()).await.unwrap();
        let written = remote.written();
        assert_eq!(written.len(), 1);
        assert!(written[0].contains("/market/match:BTC-USDT"));
    }
}
