//! Pipeline Errors
//!
//! Outcome taxonomy of one connection attempt. The supervisor retries
//! everything except cancellation and configuration errors.

use thiserror::Error;

use crate::application::ports::{SinkError, TransportError};
use crate::domain::market::SinkKind;
use crate::domain::subscription::IndexError;

/// Why a connection attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The market list is structurally invalid. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Handshake with the venue failed.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// A frame or response could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The venue reported a protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection failed.
    #[error("transport failed: {0}")]
    Transport(TransportError),

    /// A fallible sink rejected a batch.
    #[error("commit to {sink} failed: {source}")]
    SinkCommit {
        /// Sink that failed.
        sink: SinkKind,
        /// Underlying error.
        #[source]
        source: SinkError,
    },

    /// Shutdown was requested. Never retried.
    #[error("cancelled")]
    Cancelled,

    /// A task panicked or could not be joined.
    #[error("task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Whether the supervisor may start another attempt after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Configuration(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Bootstrap(_) => "bootstrap",
            Self::Decode(_) => "decode",
            Self::Protocol(_) => "protocol",
            Self::Transport(_) => "transport",
            Self::SinkCommit { .. } => "sink_commit",
            Self::Cancelled => "cancelled",
            Self::Task(_) => "task",
        }
    }

    /// Wrap a handshake failure, keeping local close as cancellation.
    #[must_use]
    pub fn bootstrap(context: &str, err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::Cancelled,
            other => Self::Bootstrap(format!("{context}: {other}")),
        }
    }
}

impl From<TransportError> for PipelineError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

impl From<IndexError> for PipelineError {
    fn from(err: IndexError) -> Self {
        Self::Configuration(err.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(PipelineError::Cancelled, false ; "cancelled")]
    #[test_case(PipelineError::Configuration("x".into()), false ; "configuration")]
    #[test_case(PipelineError::Bootstrap("x".into()), true ; "bootstrap")]
    #[test_case(PipelineError::Decode("x".into()), true ; "decode")]
    #[test_case(PipelineError::Transport(TransportError::PeerClosed), true ; "transport")]
    #[test_case(
        PipelineError::SinkCommit { sink: SinkKind::ElasticSearch, source: SinkError::Rejected("x".into()) },
        true ; "sink commit"
    )]
    fn retryable(err: PipelineError, expected: bool) {
        assert_eq!(err.is_retryable(), expected);
    }

    #[test]
    fn local_close_is_cancellation() {
        assert_eq!(PipelineError::from(TransportError::Closed), PipelineError::Cancelled);
        assert_eq!(
            PipelineError::bootstrap("welcome", TransportError::Closed),
            PipelineError::Cancelled
        );
        assert_eq!(
            PipelineError::from(TransportError::PeerClosed),
            PipelineError::Transport(TransportError::PeerClosed)
        );
    }

    #[test]
    fn bootstrap_keeps_context() {
        let err = PipelineError::bootstrap("welcome", TransportError::PeerClosed);
        assert_eq!(
            err.to_string(),
            "bootstrap failed: welcome: connection closed by exchange server"
        );
    }
}
