//! Stream Reader
//!
//! Single consumer of the persistent stream. Decodes each frame, drops
//! what is not data, throttles data per subscription, normalizes it and
//! hands it to the batching fan-out. A payload is only decoded once its
//! topic resolves to a subscription, so messages for other topics are
//! dropped whatever they carry.
//!
//! The reader owns a private copy of the configuration index; throttle
//! state is never shared with the subscriber.
//!
//! # Termination
//!
//! | Cause                     | Result                           |
//! |---------------------------|----------------------------------|
//! | local close (guardian)    | `Cancelled`                      |
//! | peer close                | `Transport(PeerClosed)`          |
//! | malformed frame / payload | `Decode`                         |
//! | server `error` envelope   | `Protocol`                       |
//! | fan-out hand-off failure  | the outlet's error               |

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::StreamHandle;
use crate::application::services::fanout::{BatchFanOut, BatchOutlet};
use crate::domain::market::ChannelKind;
use crate::domain::subscription::{ConfigIndex, SubscriptionKey};
use crate::infrastructure::kucoin::codec::{Inbound, decode_frame, decode_push_data, parse_topic};
use crate::infrastructure::kucoin::normalizer::{self, Origin};
use crate::infrastructure::metrics::{self, DropReason};

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Control frame or empty frame, nothing to deliver.
    Control,
    /// Data message accepted and handed to the fan-out.
    Accepted(ChannelKind),
    /// Data message dropped by the per-subscription throttle.
    Throttled(ChannelKind),
    /// Data message dropped (bad topic or unknown subscription).
    Dropped(DropReason),
}

/// Reads the stream until it fails or the attempt is cancelled.
pub struct StreamReader<O> {
    stream: Arc<dyn StreamHandle>,
    index: ConfigIndex,
    fanout: BatchFanOut<O>,
}

impl<O: BatchOutlet> StreamReader<O> {
    /// Create a reader over a private copy of the index.
    #[must_use]
    pub fn new(stream: Arc<dyn StreamHandle>, index: ConfigIndex, fanout: BatchFanOut<O>) -> Self {
        Self {
            stream,
            index,
            fanout,
        }
    }

    /// Read frames until an error ends the loop.
    ///
    /// # Errors
    ///
    /// See the module docs for the termination table.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        loop {
            let frame = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                frame = self.stream.read() => frame,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    let err = PipelineError::from(err);
                    if err != PipelineError::Cancelled {
                        tracing::error!(exchange = "kucoin", error = %err, "stream read failed");
                    }
                    return Err(err);
                }
            };

            self.handle_frame(&frame, Utc::now(), Instant::now()).await?;
        }
    }

    /// Process one frame received at `received` / `now`.
    ///
    /// # Errors
    ///
    /// Returns `Decode` or `Protocol` for a frame that ends the stream,
    /// or the fan-out's error.
    pub async fn handle_frame(
        &mut self,
        frame: &[u8],
        received: DateTime<Utc>,
        now: Instant,
    ) -> Result<FrameOutcome, PipelineError> {
        if frame.is_empty() {
            return Ok(FrameOutcome::Control);
        }

        match decode_frame(frame)? {
            Inbound::Welcome | Inbound::Pong => Ok(FrameOutcome::Control),
            Inbound::Ack { id } => {
                match id.and_then(|id| self.index.resolve_id(id)) {
                    Some(key) => {
                        tracing::debug!(exchange = "kucoin", subscription = %key, "channel subscribed");
                    }
                    None => tracing::debug!(exchange = "kucoin", ?id, "ack for unknown subscription"),
                }
                Ok(FrameOutcome::Control)
            }
            Inbound::Message { topic, data } => self.handle_message(&topic, &data, received, now).await,
            Inbound::Error { code, message } => Err(PipelineError::Protocol(match code {
                Some(code) => format!("server error {code}: {message}"),
                None => format!("server error: {message}"),
            })),
            Inbound::Unknown(kind) => {
                tracing::trace!(exchange = "kucoin", kind = %kind, "ignoring frame");
                Ok(FrameOutcome::Control)
            }
        }
    }

    /// Records still buffered in the fan-out.
    #[must_use]
    pub const fn fanout(&self) -> &BatchFanOut<O> {
        &self.fanout
    }

    async fn handle_message(
        &mut self,
        topic: &str,
        data: &Value,
        received: DateTime<Utc>,
        now: Instant,
    ) -> Result<FrameOutcome, PipelineError> {
        let Some((kind, market)) = parse_topic(topic) else {
            tracing::trace!(exchange = "kucoin", topic, "dropping message with unparsable topic");
            metrics::record_message_dropped(DropReason::BadTopic);
            return Ok(FrameOutcome::Dropped(DropReason::BadTopic));
        };
        metrics::record_message_received(kind);

        let key = SubscriptionKey::new(market, kind);
        let Some(state) = self.index.get_mut(&key) else {
            tracing::trace!(exchange = "kucoin", subscription = %key, "dropping message for unknown subscription");
            metrics::record_message_dropped(DropReason::UnknownSubscription);
            return Ok(FrameOutcome::Dropped(DropReason::UnknownSubscription));
        };
        let data = decode_push_data(data)?;
        if !state.admit(now) {
            metrics::record_update_throttled(kind);
            return Ok(FrameOutcome::Throttled(kind));
        }

        let origin = Origin {
            market,
            commit_name: &state.commit_name,
        };
        match kind {
            ChannelKind::Ticker => {
                let ticker = normalizer::push_ticker(origin, &data, received)?;
                self.fanout.push_ticker(&ticker, &state.sinks).await?;
            }
            ChannelKind::Trade => {
                let trade = normalizer::push_trade(origin, &data)?;
                self.fanout.push_trade(&trade, &state.sinks).await?;
            }
        }
        Ok(FrameOutcome::Accepted(kind))
    }
}

// =============================================================================
// Tests
// =============================================================================
