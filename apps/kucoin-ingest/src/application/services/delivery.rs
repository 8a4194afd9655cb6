//! Sink Delivery
//!
//! One task per (sink, record kind) that a push subscription uses. Each
//! task drains its bounded queue and commits batches into the sink; a
//! slow sink stalls the reader through the queue instead of dropping data.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::{Sink, SinkRegistry};
use crate::application::services::fanout::QueueOutlet;
use crate::domain::market::{ChannelKind, SinkKind};
use crate::domain::streaming::Batch;
use crate::domain::subscription::ConfigIndex;

/// Receiving end of one delivery queue plus the sink it commits to.
pub struct DeliveryTask {
    /// Target sink.
    pub sink: Arc<dyn Sink>,
    /// Record kind carried by the queue.
    pub kind: ChannelKind,
    /// Queue receiver.
    pub queue: mpsc::Receiver<Batch>,
}

impl std::fmt::Debug for DeliveryTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTask")
            .field("sink", &self.sink.kind())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl DeliveryTask {
    /// Drain the queue until it closes, a commit fails, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `SinkCommit` on a failed commit and `Cancelled` on shutdown.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let sink_kind = self.sink.kind();
        tracing::debug!(sink = %sink_kind, record = %self.kind, "delivery task started");

        loop {
            let batch = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                batch = self.queue.recv() => batch,
            };
            let Some(batch) = batch else {
                tracing::debug!(sink = %sink_kind, record = %self.kind, "delivery queue closed");
                return Ok(());
            };

            tracing::trace!(sink = %sink_kind, record = %self.kind, records = batch.len(), "committing batch");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                committed = self.sink.commit(batch) => {
                    committed.map_err(|source| PipelineError::SinkCommit {
                        sink: sink_kind,
                        source,
                    })?;
                }
            }
        }
    }
}

/// Resolve one shared handle per sink and one bounded queue per
/// (sink, kind) that a push subscription of the index uses.
///
/// # Errors
///
/// Returns `Configuration` if a referenced sink is not registered.
pub fn wire_delivery(
    index: &ConfigIndex,
    registry: &SinkRegistry,
    queue_capacity: usize,
    cancel: CancellationToken,
) -> Result<(QueueOutlet, Vec<DeliveryTask>), PipelineError> {
    let mut senders: HashMap<(SinkKind, ChannelKind), mpsc::Sender<Batch>> = HashMap::new();
    let mut tasks = Vec::new();

    for &sink_kind in index.sinks() {
        let Some(sink) = registry.get(sink_kind) else {
            return Err(PipelineError::Configuration(format!(
                "sink {sink_kind} is referenced but not configured"
            )));
        };

        for kind in [ChannelKind::Ticker, ChannelKind::Trade] {
            if !index.pushes_to(sink_kind, kind) {
                continue;
            }
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            senders.insert((sink_kind, kind), tx);
            tasks.push(DeliveryTask {
                sink: Arc::clone(&sink),
                kind,
                queue: rx,
            });
        }
    }

    Ok((QueueOutlet::new(senders, cancel), tasks))
}

// =============================================================================
// Tests
// =============================================================================
