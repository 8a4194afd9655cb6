//! Pipeline Supervisor
//!
//! Outer retry loop around connection attempts. Retry state is plain data
//! ([`RetryState`]) updated once per failed attempt:
//!
//! ```text
//! Attempting ──Err(retryable)──► RetryState::on_failure ──Retry──► wait gap ──► Attempting
//!     │                                   │
//!     │                                   ├─Disabled / GiveUp──► stop (fatal)
//!     └──Err(Cancelled | Configuration)───┴──────────────────────► stop
//! ```
//!
//! The counter restarts at 1 when the previous failure is at least
//! `reset_window` old. Without a reset window it only grows.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;

/// Retry parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum consecutive retries (0 disables retrying).
    pub max_retries: u32,
    /// Wait between a failure and the next attempt.
    pub gap: Duration,
    /// Age of the previous failure after which the counter restarts at 1.
    pub reset_window: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            gap: Duration::from_secs(30),
            reset_window: Some(Duration::from_secs(300)),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait the gap, then run attempt number `retry` of the current window.
    Retry {
        /// Retry counter value.
        retry: u32,
    },
    /// Retrying is disabled.
    Disabled,
    /// The counter exceeded the maximum.
    GiveUp {
        /// Retry counter value that exceeded the maximum.
        retry: u32,
    },
}

/// Retry counter carried between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    count: u32,
    last_failure: Instant,
}

impl RetryState {
    /// Start counting at `started`.
    #[must_use]
    pub const fn new(started: Instant) -> Self {
        Self {
            count: 0,
            last_failure: started,
        }
    }

    /// Current counter value.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Register a failure at `now`.
    pub fn on_failure(&mut self, policy: &RetryPolicy, now: Instant) -> RetryDecision {
        if policy.max_retries == 0 {
            return RetryDecision::Disabled;
        }

        let within_window = policy
            .reset_window
            .is_none_or(|window| now.saturating_duration_since(self.last_failure) < window);
        self.count = if within_window {
            self.count.saturating_add(1)
        } else {
            1
        };
        self.last_failure = now;

        if self.count > policy.max_retries {
            RetryDecision::GiveUp { retry: self.count }
        } else {
            RetryDecision::Retry { retry: self.count }
        }
    }
}

/// Why supervision stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// The attempt failed and retrying is disabled.
    #[error("not able to connect {exchange} exchange. please check the log for details")]
    RetryDisabled {
        /// Exchange name.
        exchange: &'static str,
    },

    /// Consecutive failures exceeded the retry limit.
    #[error(
        "not able to connect {exchange} exchange even after {retries} retries ({attempts} attempts). please check the log for details"
    )]
    RetriesExhausted {
        /// Exchange name.
        exchange: &'static str,
        /// Configured retry limit.
        retries: u32,
        /// Attempts made in the current window.
        attempts: u32,
    },

    /// The market list is invalid.
    #[error("{exchange} configuration error: {message}")]
    Configuration {
        /// Exchange name.
        exchange: &'static str,
        /// Error message.
        message: String,
    },

    /// Shutdown was requested.
    #[error("{exchange} ingestion cancelled")]
    Cancelled {
        /// Exchange name.
        exchange: &'static str,
    },
}

/// Run `attempt` until it succeeds, is cancelled, or retries run out.
///
/// Each attempt receives its number (from 1) and a child of `cancel`.
///
/// # Errors
///
/// Returns a `SupervisorError` describing why supervision stopped.
pub async fn supervise<F, Fut>(
    exchange: &'static str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<(), SupervisorError>
where
    F: FnMut(u32, CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), PipelineError>>,
{
    let mut state = RetryState::new(Instant::now());
    let mut number: u32 = 0;

    loop {
        number += 1;
        let err = match attempt(number, cancel.child_token()).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if !err.is_retryable() {
            if let PipelineError::Configuration(message) = err {
                tracing::error!(exchange, error = %message, "invalid configuration");
                return Err(SupervisorError::Configuration { exchange, message });
            }
            return Err(SupervisorError::Cancelled { exchange });
        }
        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled { exchange });
        }

        tracing::error!(exchange, attempt = number, error = %err, "error occurred");

        match state.on_failure(policy, Instant::now()) {
            RetryDecision::Disabled => return Err(SupervisorError::RetryDisabled { exchange }),
            RetryDecision::GiveUp { retry } => {
                return Err(SupervisorError::RetriesExhausted {
                    exchange,
                    retries: policy.max_retries,
                    attempts: retry,
                });
            }
            RetryDecision::Retry { retry } => {
                tracing::warn!(
                    exchange,
                    retry,
                    gap_secs = policy.gap.as_secs(),
                    "retrying connection after gap"
                );
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::info!(exchange, "cancelled while waiting to retry");
                        return Err(SupervisorError::Cancelled { exchange });
                    }
                    () = tokio::time::sleep(policy.gap) => {}
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
