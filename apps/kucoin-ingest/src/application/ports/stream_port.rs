//! Stream Transport Port (Driven Port)
//!
//! Interface for the persistent, bidirectional connection to the venue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Transport-level failure shared by the stream and request/response ports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The handle was closed locally; pending I/O was unblocked.
    #[error("connection closed locally")]
    Closed,

    /// The remote end closed the connection.
    #[error("connection closed by exchange server")]
    PeerClosed,

    /// The operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A request/response exchange returned a non-success status.
    #[error("HTTP status {status} from {url}")]
    Http {
        /// Response status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Any other I/O or protocol failure.
    #[error("{0}")]
    Io(String),
}

/// An open persistent stream.
///
/// Implementations must allow `close` while a `read` or `write` is
/// pending on another task; the pending call returns
/// [`TransportError::Closed`].
#[async_trait]
pub trait StreamHandle: Send + Sync {
    /// Read the next frame. Control frames surface as empty frames.
    async fn read(&self) -> Result<Vec<u8>, TransportError>;

    /// Write a text frame.
    async fn write(&self, frame: String) -> Result<(), TransportError>;

    /// Close the stream and unblock pending I/O.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens persistent streams.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a stream to `url`.
    async fn open(&self, url: &str) -> Result<Arc<dyn StreamHandle>, TransportError>;
}
