//! Fail-Fast Task Group
//!
//! Runs the tasks of one connection attempt under a shared cancellation
//! token. The first task to fail cancels its siblings and becomes the
//! group's result; a panicking task counts as a failure.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;

/// A set of cooperating tasks with fail-fast semantics.
#[derive(Debug)]
pub struct TaskGroup {
    tasks: JoinSet<(&'static str, Result<(), PipelineError>)>,
    cancel: CancellationToken,
}

impl TaskGroup {
    /// Create a group cancelled through `cancel`.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Spawn a named task.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Wait for every task. Returns the first error, if any.
    ///
    /// # Errors
    ///
    /// Returns the first task error; a panic surfaces as `PipelineError::Task`.
    pub async fn wait(mut self) -> Result<(), PipelineError> {
        let mut first: Option<PipelineError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, outcome) = match joined {
                Ok((name, outcome)) => (name, outcome),
                Err(err) => ("unknown", Err(PipelineError::Task(err.to_string()))),
            };

            match outcome {
                Ok(()) => tracing::debug!(task = name, "task finished"),
                Err(err) if first.is_none() => {
                    if err == PipelineError::Cancelled {
                        tracing::debug!(task = name, "task cancelled");
                    } else {
                        tracing::warn!(task = name, error = %err, "task failed, stopping siblings");
                    }
                    self.cancel.cancel();
                    first = Some(err);
                }
                Err(err) => tracing::trace!(task = name, error = %err, "sibling stopped"),
            }
        }

        first.map_or(Ok(()), Err)
    }
}

// =============================================================================
// Tests
// =============================================================================
