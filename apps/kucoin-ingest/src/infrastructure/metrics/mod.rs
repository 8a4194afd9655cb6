//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: data messages received, throttled and dropped
//! - **Commits**: batches and records committed per sink
//! - **Subscriptions**: push subscriptions registered in the current attempt
//! - **Supervision**: failed attempts by error kind, retries scheduled
//!
//! # Integration
//!
//! With a non-zero port the exporter serves `/metrics` on that port.
//! Recording functions are no-ops until [`init_metrics`] runs.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::market::{ChannelKind, SinkKind};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics setup errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be built.
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),

    /// A global recorder is already installed.
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

/// Install the Prometheus recorder. With `port > 0` an HTTP listener is
/// started on `0.0.0.0:port`; this must run inside a Tokio runtime.
///
/// Calling it again returns the existing handle.
///
/// # Errors
///
/// Returns `MetricsError` if the exporter cannot be built or installed.
pub fn init_metrics(port: u16) -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = if port == 0 {
        PrometheusBuilder::new().install_recorder()?
    } else {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|err| MetricsError::Install(err.to_string()))?;
        tokio::spawn(async move {
            if let Err(err) = exporter.await {
                tracing::warn!(error = ?err, "metrics exporter stopped");
            }
        });
        tracing::info!(%addr, "metrics exporter listening");
        handle
    };

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "kucoin_ingest_messages_received_total",
        "Data messages received from the venue, by channel"
    );
    describe_counter!(
        "kucoin_ingest_updates_throttled_total",
        "Push updates dropped by the per-subscription minimum interval"
    );
    describe_counter!(
        "kucoin_ingest_messages_dropped_total",
        "Data messages dropped before normalization, by reason"
    );

    describe_counter!(
        "kucoin_ingest_batches_committed_total",
        "Batches committed, by sink and record kind"
    );
    describe_counter!(
        "kucoin_ingest_records_committed_total",
        "Records committed, by sink and record kind"
    );

    describe_gauge!(
        "kucoin_ingest_subscriptions",
        "Push subscriptions registered in the current attempt"
    );

    describe_counter!(
        "kucoin_ingest_attempt_failures_total",
        "Failed connection attempts, by error kind"
    );
    describe_counter!(
        "kucoin_ingest_retries_total",
        "Connection retries scheduled by the supervisor"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a data message was dropped before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The topic did not split into a known namespace and a market.
    BadTopic,
    /// No subscription exists for the (market, channel).
    UnknownSubscription,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::BadTopic => "bad_topic",
            Self::UnknownSubscription => "unknown_subscription",
        }
    }
}

/// Record a data message received.
pub fn record_message_received(kind: ChannelKind) {
    counter!(
        "kucoin_ingest_messages_received_total",
        "channel" => kind.as_str()
    )
    .increment(1);
}

/// Record a push update dropped by the throttle.
pub fn record_update_throttled(kind: ChannelKind) {
    counter!(
        "kucoin_ingest_updates_throttled_total",
        "channel" => kind.as_str()
    )
    .increment(1);
}

/// Record a data message dropped before normalization.
pub fn record_message_dropped(reason: DropReason) {
    counter!(
        "kucoin_ingest_messages_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a committed batch of `records` records.
pub fn record_batch_committed(sink: SinkKind, kind: ChannelKind, records: usize) {
    counter!(
        "kucoin_ingest_batches_committed_total",
        "sink" => sink.as_str(),
        "record" => kind.as_str()
    )
    .increment(1);
    counter!(
        "kucoin_ingest_records_committed_total",
        "sink" => sink.as_str(),
        "record" => kind.as_str()
    )
    .increment(records as u64);
}

/// Update the registered push subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("kucoin_ingest_subscriptions").set(count as f64);
}

/// Record a failed connection attempt.
pub fn record_attempt_failure(kind: &'static str) {
    counter!(
        "kucoin_ingest_attempt_failures_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record a scheduled retry.
pub fn record_retry() {
    counter!("kucoin_ingest_retries_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::BadTopic.as_str(), "bad_topic");
        assert_eq!(DropReason::UnknownSubscription.as_str(), "unknown_subscription");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_message_received(ChannelKind::Trade);
        record_batch_committed(SinkKind::Terminal, ChannelKind::Ticker, 3);
        set_subscriptions(2);
        record_retry();
    }
}
