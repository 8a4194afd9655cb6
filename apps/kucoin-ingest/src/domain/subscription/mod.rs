//! Subscription Index
//!
//! Per-attempt lookup from (market, channel) to subscription settings.
//!
//! # Design
//!
//! The index is rebuilt from the market list at the start of every
//! connection attempt and tracks:
//! - A numeric id per (market, channel), assigned from 1 in configuration order
//! - The sinks each subscription commits to
//! - The push throttle state (last accepted update)
//! - The distinct sinks in first-reference order
//!
//! The stream reader owns a private clone of the index and is the only
//! writer of throttle state; everybody else reads the shared original.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::domain::market::{ChannelKind, DeliveryMode, Market, SinkKind};

// =============================================================================
// Errors
// =============================================================================

/// Structural problems in the configured market list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// No markets configured.
    #[error("no markets configured")]
    NoMarkets,

    /// A market has an empty identifier.
    #[error("market at position {0} has an empty id")]
    EmptyMarketId(usize),

    /// The same (market, channel) appears twice.
    #[error("duplicate subscription for market {market}, channel {channel}")]
    Duplicate {
        /// Market identifier.
        market: String,
        /// Channel kind.
        channel: ChannelKind,
    },

    /// A channel does not name any sink.
    #[error("market {market}, channel {channel} has no sinks")]
    NoSinks {
        /// Market identifier.
        market: String,
        /// Channel kind.
        channel: ChannelKind,
    },

    /// A pull channel has a zero polling interval.
    #[error("market {market}, channel {channel} is pulled with a zero polling interval")]
    ZeroPollInterval {
        /// Market identifier.
        market: String,
        /// Channel kind.
        channel: ChannelKind,
    },
}

// =============================================================================
// Types
// =============================================================================

/// Key of a subscription: (market identifier, channel kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    /// Venue market identifier.
    pub market: String,
    /// Channel kind.
    pub channel: ChannelKind,
}

impl SubscriptionKey {
    /// Create a new key.
    #[must_use]
    pub fn new(market: impl Into<String>, channel: ChannelKind) -> Self {
        Self {
            market: market.into(),
            channel,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.market, self.channel)
    }
}

/// Settings and throttle state of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionState {
    /// Numeric subscription id, unique per attempt, starting at 1.
    pub id: u32,
    /// Name records are committed under.
    pub commit_name: String,
    /// Delivery mode.
    pub delivery: DeliveryMode,
    /// Active sinks, deduplicated, in configuration order.
    pub sinks: Vec<SinkKind>,
    /// Polling interval (pull only).
    pub poll_interval: Duration,
    /// Minimum spacing between accepted push updates.
    pub min_update_interval: Duration,
    last_accepted: Option<Instant>,
}

impl SubscriptionState {
    /// Decide whether an update arriving at `now` is accepted.
    ///
    /// Accepted iff the minimum interval is zero, nothing was accepted yet,
    /// or at least the minimum interval elapsed since the last *accepted*
    /// update. Only accepted updates move the last-accepted instant.
    pub fn admit(&mut self, now: Instant) -> bool {
        let accept = self.min_update_interval.is_zero()
            || self
                .last_accepted
                .is_none_or(|last| now.saturating_duration_since(last) >= self.min_update_interval);

        if accept {
            self.last_accepted = Some(now);
        }
        accept
    }

    /// Instant of the last accepted update.
    #[must_use]
    pub const fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    /// Check if records go to the given sink.
    #[must_use]
    pub fn targets(&self, sink: SinkKind) -> bool {
        self.sinks.contains(&sink)
    }
}

// =============================================================================
// Config Index
// =============================================================================

/// Lookup built once per connection attempt from the market list.
#[derive(Debug, Clone, Default)]
pub struct ConfigIndex {
    states: HashMap<SubscriptionKey, SubscriptionState>,
    order: Vec<SubscriptionKey>,
    channel_ids: HashMap<u32, SubscriptionKey>,
    sinks: Vec<SinkKind>,
}

impl ConfigIndex {
    /// Build the index from the configured markets.
    ///
    /// # Errors
    ///
    /// Returns `IndexError` if the market list is structurally invalid.
    pub fn build(markets: &[Market]) -> Result<Self, IndexError> {
        if markets.is_empty() {
            return Err(IndexError::NoMarkets);
        }

        let mut index = Self::default();
        let mut next_id: u32 = 0;

        for (position, market) in markets.iter().enumerate() {
            if market.id.is_empty() {
                return Err(IndexError::EmptyMarketId(position));
            }

            for info in &market.channels {
                let key = SubscriptionKey::new(market.id.clone(), info.kind);

                if index.states.contains_key(&key) {
                    return Err(IndexError::Duplicate {
                        market: key.market,
                        channel: key.channel,
                    });
                }
                if info.sinks.is_empty() {
                    return Err(IndexError::NoSinks {
                        market: key.market,
                        channel: key.channel,
                    });
                }
                if info.delivery == DeliveryMode::Pull && info.poll_interval_sec == 0 {
                    return Err(IndexError::ZeroPollInterval {
                        market: key.market,
                        channel: key.channel,
                    });
                }

                let mut sinks = Vec::with_capacity(info.sinks.len());
                for sink in &info.sinks {
                    if !sinks.contains(sink) {
                        sinks.push(*sink);
                    }
                    if !index.sinks.contains(sink) {
                        index.sinks.push(*sink);
                    }
                }

                next_id += 1;
                index.channel_ids.insert(next_id, key.clone());
                index.order.push(key.clone());
                index.states.insert(
                    key,
                    SubscriptionState {
                        id: next_id,
                        commit_name: market.commit_name().to_string(),
                        delivery: info.delivery,
                        sinks,
                        poll_interval: Duration::from_secs(info.poll_interval_sec),
                        min_update_interval: Duration::from_secs(info.min_update_interval_sec),
                        last_accepted: None,
                    },
                );
            }
        }

        Ok(index)
    }

    /// Look up a subscription.
    #[must_use]
    pub fn get(&self, key: &SubscriptionKey) -> Option<&SubscriptionState> {
        self.states.get(key)
    }

    /// Look up a subscription for mutation.
    pub fn get_mut(&mut self, key: &SubscriptionKey) -> Option<&mut SubscriptionState> {
        self.states.get_mut(key)
    }

    /// Resolve a numeric subscription id.
    #[must_use]
    pub fn resolve_id(&self, id: u32) -> Option<&SubscriptionKey> {
        self.channel_ids.get(&id)
    }

    /// All subscriptions in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&SubscriptionKey, &SubscriptionState)> {
        self.order
            .iter()
            .filter_map(|key| self.states.get(key).map(|state| (key, state)))
    }

    /// Subscriptions with the given delivery mode, in configuration order.
    pub fn with_delivery(
        &self,
        delivery: DeliveryMode,
    ) -> impl Iterator<Item = (&SubscriptionKey, &SubscriptionState)> {
        self.iter().filter(move |(_, state)| state.delivery == delivery)
    }

    /// Whether any channel is delivered over the persistent stream.
    #[must_use]
    pub fn has_push(&self) -> bool {
        self.with_delivery(DeliveryMode::Push).next().is_some()
    }

    /// Whether a push subscription of `kind` commits to `sink`.
    #[must_use]
    pub fn pushes_to(&self, sink: SinkKind, kind: ChannelKind) -> bool {
        self.with_delivery(DeliveryMode::Push)
            .any(|(key, state)| key.channel == kind && state.targets(sink))
    }

    /// Distinct sinks in first-reference order.
    #[must_use]
    pub fn sinks(&self) -> &[SinkKind] {
        &self.sinks
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::domain::market::ChannelInfo;

    fn sample_markets() -> Vec<Market> {
        vec![
            Market::new(
                "BTC-USDT",
                vec![
                    ChannelInfo::push(ChannelKind::Ticker, 0, vec![SinkKind::Terminal]),
                    ChannelInfo::push(
                        ChannelKind::Trade,
                        0,
                        vec![SinkKind::ElasticSearch, SinkKind::Terminal],
                    ),
                ],
            )
            .with_commit_name("BTC_USDT"),
            Market::new(
                "ETH-USDT",
                vec![ChannelInfo::pull(ChannelKind::Trade, 5, vec![SinkKind::ElasticSearch])],
            ),
        ]
    }

    #[test]
    fn ids_increase_from_one_in_configuration_order() {
        let index = ConfigIndex::build(&sample_markets()).unwrap();

        let ids: Vec<_> = index.iter().map(|(key, state)| (key.to_string(), state.id)).collect();
        assert_eq!(
            ids,
            vec![
                ("BTC-USDT/ticker".to_string(), 1),
                ("BTC-USDT/trade".to_string(), 2),
                ("ETH-USDT/trade".to_string(), 3),
            ]
        );
        assert_eq!(
            index.resolve_id(3),
            Some(&SubscriptionKey::new("ETH-USDT", ChannelKind::Trade))
        );
        assert!(index.resolve_id(4).is_none());
    }

    #[test]
    fn sinks_in_first_reference_order() {
        let index = ConfigIndex::build(&sample_markets()).unwrap();
        assert_eq!(index.sinks(), &[SinkKind::Terminal, SinkKind::ElasticSearch]);
    }

    #[test]
    fn commit_name_and_delivery_recorded() {
        let index = ConfigIndex::build(&sample_markets()).unwrap();

        let btc = index
            .get(&SubscriptionKey::new("BTC-USDT", ChannelKind::Ticker))
            .unwrap();
        assert_eq!(btc.commit_name, "BTC_USDT");
        assert_eq!(btc.delivery, DeliveryMode::Push);

        let eth = index
            .get(&SubscriptionKey::new("ETH-USDT", ChannelKind::Trade))
            .unwrap();
        assert_eq!(eth.commit_name, "ETH-USDT");
        assert_eq!(eth.poll_interval, Duration::from_secs(5));
        assert!(index.has_push());
    }

    #[test]
    fn pushes_to_ignores_pull_channels() {
        let index = ConfigIndex::build(&sample_markets()).unwrap();

        assert!(index.pushes_to(SinkKind::Terminal, ChannelKind::Ticker));
        assert!(index.pushes_to(SinkKind::ElasticSearch, ChannelKind::Trade));
        assert!(!index.pushes_to(SinkKind::ElasticSearch, ChannelKind::Ticker));
    }

    #[test]
    fn duplicate_sinks_collapse() {
        let markets = vec![Market::new(
            "BTC-USDT",
            vec![ChannelInfo::push(
                ChannelKind::Ticker,
                0,
                vec![SinkKind::Terminal, SinkKind::Terminal],
            )],
        )];
        let index = ConfigIndex::build(&markets).unwrap();
        let state = index.iter().next().unwrap().1;
        assert_eq!(state.sinks, vec![SinkKind::Terminal]);
    }

    #[test]
    fn rejects_structural_errors() {
        assert_eq!(ConfigIndex::build(&[]).unwrap_err(), IndexError::NoMarkets);

        let duplicate = vec![Market::new(
            "BTC-USDT",
            vec![
                ChannelInfo::push(ChannelKind::Ticker, 0, vec![SinkKind::Terminal]),
                ChannelInfo::pull(ChannelKind::Ticker, 1, vec![SinkKind::Terminal]),
            ],
        )];
        assert!(matches!(
            ConfigIndex::build(&duplicate),
            Err(IndexError::Duplicate { .. })
        ));

        let no_sinks = vec![Market::new(
            "BTC-USDT",
            vec![ChannelInfo::push(ChannelKind::Ticker, 0, vec![])],
        )];
        assert!(matches!(
            ConfigIndex::build(&no_sinks),
            Err(IndexError::NoSinks { .. })
        ));

        let zero_poll = vec![Market::new(
            "BTC-USDT",
            vec![ChannelInfo::pull(ChannelKind::Trade, 0, vec![SinkKind::Terminal])],
        )];
        assert!(matches!(
            ConfigIndex::build(&zero_poll),
            Err(IndexError::ZeroPollInterval { .. })
        ));

        let empty_id = vec![Market::new("", vec![])];
        assert_eq!(
            ConfigIndex::build(&empty_id).unwrap_err(),
            IndexError::EmptyMarketId(0)
        );
    }

    #[test]
    fn clone_is_independent() {
        let shared = ConfigIndex::build(&sample_markets()).unwrap();
        let mut private = shared.clone();
        let key = SubscriptionKey::new("BTC-USDT", ChannelKind::Ticker);

        assert!(private.get_mut(&key).unwrap().admit(Instant::now()));
        assert!(private.get(&key).unwrap().last_accepted().is_some());
        assert!(shared.get(&key).unwrap().last_accepted().is_none());
    }

    fn throttled_state(secs: u64) -> SubscriptionState {
        SubscriptionState {
            id: 1,
            commit_name: "BTC-USDT".to_string(),
            delivery: DeliveryMode::Push,
            sinks: vec![SinkKind::Terminal],
            poll_interval: Duration::ZERO,
            min_update_interval: Duration::from_secs(secs),
            last_accepted: None,
        }
    }

    #[test]
    fn throttle_drops_do_not_advance_last_accepted() {
        let mut state = throttled_state(10);
        let t0 = Instant::now();
        let at = |secs: u64| t0 + Duration::from_secs(secs);

        assert!(state.admit(at(0)));
        assert!(!state.admit(at(4)));
        assert!(!state.admit(at(9)));
        assert_eq!(state.last_accepted(), Some(at(0)));

        // 10s after the last accepted update, not after the last dropped one.
        assert!(state.admit(at(10)));
        assert!(!state.admit(at(19)));
        assert!(state.admit(at(20)));
        assert_eq!(state.last_accepted(), Some(at(20)));
    }

    proptest! {
        #[test]
        fn zero_interval_accepts_everything(offsets in proptest::collection::vec(0u64..10_000, 1..50)) {
            let mut state = throttled_state(0);
            let t0 = Instant::now();
            let mut sorted = offsets;
            sorted.sort_unstable();
            for ms in sorted {
                prop_assert!(state.admit(t0 + Duration::from_millis(ms)));
            }
        }

        #[test]
        fn accepted_iff_interval_since_last_accepted(
            interval_ms in 1u64..5_000,
            offsets in proptest::collection::vec(0u64..60_000, 1..80),
        ) {
            let mut state = throttled_state(0);
            state.min_update_interval = Duration::from_millis(interval_ms);
            let t0 = Instant::now();
            let mut sorted = offsets;
            sorted.sort_unstable();

            let mut last: Option<u64> = None;
            for ms in sorted {
                let expected = last.is_none_or(|prev| ms - prev >= interval_ms);
                prop_assert_eq!(state.admit(t0 + Duration::from_millis(ms)), expected);
                if expected {
                    last = Some(ms);
                }
            }
        }
    }
}
