//! Keep-Alive
//!
//! Sends a ping at 90% of the server-advertised interval so the session
//! never idles past the server's timeout. The first ping goes out one
//! period after start.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::StreamHandle;
use crate::infrastructure::kucoin::codec::encode_ping;

/// Periodic ping writer for one session.
pub struct KeepAlive {
    stream: Arc<dyn StreamHandle>,
    period: Duration,
}

impl KeepAlive {
    /// Create a keep-alive for a server-advertised interval.
    #[must_use]
    pub fn new(stream: Arc<dyn StreamHandle>, server_interval: Duration) -> Self {
        Self {
            stream,
            period: ping_period(server_interval),
        }
    }

    /// Interval between pings.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Ping until cancelled or a write fails.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` on shutdown and `Transport` on a failed write.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = ticker.tick() => {}
            }

            let frame = encode_ping(&Utc::now().timestamp_millis().to_string())?;
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                written = self.stream.write(frame) => written?,
            }
            tracing::trace!(exchange = "kucoin", "ping sent");
        }
    }
}

/// 90% of the server interval, never below one second.
#[must_use]
pub fn ping_period(server_interval: Duration) -> Duration {
    (server_interval * 9 / 10).max(Duration::from_secs(1))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::application::ports::TransportError;
    use crate::infrastructure::transport::MemoryStream;

    #[test_case(18, 16_200 ; "typical")]
    #[test_case(10, 9_000 ; "ten seconds")]
    #[test_case(1, 1_000 ; "floor")]
    fn period_is_ninety_percent(server_secs: u64, expected_ms: u64) {
        assert_eq!(
            ping_period(Duration::from_secs(server_secs)),
            Duration::from_millis(expected_ms)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pings_once_per_period() {
        let (stream, remote) = MemoryStream::pair();
        let cancel = CancellationToken::new();
        let keep_alive = KeepAlive::new(stream, Duration::from_secs(10));
        let task = tokio::spawn(keep_alive.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(8_900)).await;
        assert!(remote.written().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(remote.written().len(), 1);

        tokio::time::sleep(Duration::from_millis(9_000)).await;
        let written = remote.written();
        assert_eq!(written.len(), 2);
        let ping: serde_json::Value = serde_json::from_str(&written[0]).unwrap();
        assert_eq!(ping["type"], "ping");
        assert!(ping["id"].as_str().unwrap().parse::<i64>().is_ok());

        cancel.cancel();
        assert_eq!(task.await.unwrap(), Err(PipelineError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_ends_the_task() {
        let (stream, remote) = MemoryStream::pair();
        remote.fail_writes(TransportError::PeerClosed);
        let keep_alive = KeepAlive::new(stream, Duration::from_secs(2));

        let result = keep_alive.run(CancellationToken::new()).await;
        assert_eq!(
            result,
            Err(PipelineError::Transport(TransportError::PeerClosed))
        );
    }
}
