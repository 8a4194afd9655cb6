//! KuCoin Pipeline
//!
//! Wires one connection attempt and runs attempts under the supervisor.
//!
//! ```text
//! attempt
//!   ├── ConfigIndex::build          (fails fast on a bad market list)
//!   ├── wire_delivery               (one queue + task per sink × kind)
//!   ├── if any push subscription:
//!   │     ├── bootstrap             (token, endpoint, welcome)
//!   │     ├── guardian              (close on cancel)
//!   │     ├── keep-alive
//!   │     ├── reader                (private index copy, QueueOutlet)
//!   │     ├── delivery tasks
//!   │     └── subscriber
//!   └── one poller per pull subscription (DirectOutlet)
//! ```
//!
//! All tasks share one attempt-scoped token; the first failure cancels
//! the rest.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::{RestClient, SinkRegistry, StreamConnector};
use crate::application::services::fanout::{BatchFanOut, BatchSizes, DirectOutlet};
use crate::application::services::delivery::wire_delivery;
use crate::application::services::supervisor::{RetryPolicy, SupervisorError, supervise};
use crate::application::services::task_group::TaskGroup;
use crate::domain::market::{DeliveryMode, Market, SinkKind};
use crate::domain::subscription::ConfigIndex;
use crate::infrastructure::config::ConnectionConfig;
use crate::infrastructure::kucoin::bootstrap::Bootstrapper;
use crate::infrastructure::kucoin::guardian::guard;
use crate::infrastructure::kucoin::heartbeat::KeepAlive;
use crate::infrastructure::kucoin::poller::RestPoller;
use crate::infrastructure::kucoin::reader::StreamReader;
use crate::infrastructure::kucoin::subscriber::{SubscribeRateLimit, Subscriber};
use crate::infrastructure::metrics;
use crate::infrastructure::sinks::metered;

/// Exchange name used in diagnostics.
pub const EXCHANGE_NAME: &str = "kucoin";

/// External collaborators of the pipeline.
#[derive(Clone)]
pub struct PipelineDeps {
    /// Request/response transport.
    pub rest: Arc<dyn RestClient>,
    /// Persistent stream transport.
    pub connector: Arc<dyn StreamConnector>,
    /// Sink handles by kind.
    pub sinks: SinkRegistry,
}

impl std::fmt::Debug for PipelineDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDeps")
            .field("sinks", &self.sinks)
            .finish_non_exhaustive()
    }
}

/// Per-attempt tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// REST base URL, ending with `/`.
    pub rest_base_url: String,
    /// Capacity of each delivery queue.
    pub queue_capacity: usize,
    /// Batch sizes per sink.
    pub batch_sizes: HashMap<SinkKind, BatchSizes>,
    /// Subscribe request pacing.
    pub subscribe_limit: SubscribeRateLimit,
}

impl From<&ConnectionConfig> for PipelineSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            rest_base_url: config.venue.rest_base_url.clone(),
            queue_capacity: config.queue_capacity,
            batch_sizes: config.batch_sizes(),
            subscribe_limit: config.subscribe_limit(),
        }
    }
}

/// The KuCoin ingestion pipeline.
#[derive(Debug, Clone)]
pub struct KucoinPipeline {
    markets: Arc<[Market]>,
    settings: PipelineSettings,
    deps: PipelineDeps,
}

impl KucoinPipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(markets: Vec<Market>, settings: PipelineSettings, mut deps: PipelineDeps) -> Self {
        deps.sinks = metered(&deps.sinks);
        Self {
            markets: markets.into(),
            settings,
            deps,
        }
    }

    /// Run attempts until retries are exhausted or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns why supervision stopped.
    pub async fn run(&self, policy: &RetryPolicy, cancel: &CancellationToken) -> Result<(), SupervisorError> {
        supervise(EXCHANGE_NAME, policy, cancel, |number, attempt_cancel| async move {
            if number > 1 {
                metrics::record_retry();
            }
            let result = self.run_attempt(number, attempt_cancel).await;
            if let Err(err) = &result
                && err.is_retryable()
                && !cancel.is_cancelled()
            {
                metrics::record_attempt_failure(err.kind());
            }
            result
        })
        .await
    }

    /// Run one attempt from scratch. Every piece of per-attempt state is
    /// rebuilt here.
    ///
    /// # Errors
    ///
    /// Returns the first task error, `Configuration` for a bad market list
    /// or an unregistered sink.
    pub async fn run_attempt(&self, number: u32, cancel: CancellationToken) -> Result<(), PipelineError> {
        let index = ConfigIndex::build(&self.markets)?;
        if index.is_empty() {
            return Err(PipelineError::Configuration("no channels configured".into()));
        }
        let (outlet, delivery) = wire_delivery(
            &index,
            &self.deps.sinks,
            self.settings.queue_capacity,
            cancel.clone(),
        )?;

        tracing::info!(
            exchange = EXCHANGE_NAME,
            attempt = number,
            subscriptions = index.len(),
            "starting connection attempt"
        );

        let mut group = TaskGroup::new(cancel.clone());

        if index.has_push() {
            let bootstrapper = Bootstrapper::new(
                Arc::clone(&self.deps.rest),
                Arc::clone(&self.deps.connector),
                self.settings.rest_base_url.clone(),
            );
            let session = bootstrapper.bootstrap(&cancel).await?;
            let stream = session.stream;

            group.spawn("guardian", guard(Arc::clone(&stream), cancel.clone()));
            group.spawn(
                "keep_alive",
                KeepAlive::new(Arc::clone(&stream), session.keep_alive).run(cancel.clone()),
            );

            let fanout = BatchFanOut::new(outlet, self.settings.batch_sizes.clone());
            let reader = StreamReader::new(Arc::clone(&stream), index.clone(), fanout);
            group.spawn("reader", reader.run(cancel.clone()));

            for task in delivery {
                group.spawn("delivery", task.run(cancel.clone()));
            }

            let subscriber = Subscriber::new(stream, Arc::new(index.clone()), self.settings.subscribe_limit);
            let subscribe_cancel = cancel.clone();
            group.spawn("subscriber", async move {
                subscriber.run(&subscribe_cancel).await.map(|_| ())
            });
        }

        for (key, state) in index.with_delivery(DeliveryMode::Pull) {
            let outlet = DirectOutlet::new(self.deps.sinks.clone(), cancel.clone());
            let fanout = BatchFanOut::new(outlet, self.settings.batch_sizes.clone());
            let poller = RestPoller::new(
                Arc::clone(&self.deps.rest),
                &self.settings.rest_base_url,
                key,
                state,
                fanout,
            );
            group.spawn("poller", poller.run(cancel.clone()));
        }

        group.wait().await
    }
}

/// Ingest `markets` until retries run out or `cancel` fires.
///
/// # Errors
///
/// Returns a `SupervisorError` carrying a diagnostic that names the
/// exchange and the attempts made.
pub async fn run(
    markets: Vec<Market>,
    retry: &RetryPolicy,
    connection: &ConnectionConfig,
    deps: PipelineDeps,
    cancel: &CancellationToken,
) -> Result<(), SupervisorError> {
    KucoinPipeline::new(markets, PipelineSettings::from(connection), deps)
        .run(retry, cancel)
        .await
}
