//! Connection Guardian
//!
//! Closes the stream once the attempt is cancelled, which unblocks a
//! reader parked on `read()`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::StreamHandle;

/// Wait for `cancel`, then close `stream`. Always ends with `Cancelled`.
///
/// # Errors
///
/// Returns `Cancelled` once the stream has been closed.
pub async fn guard(
    stream: Arc<dyn StreamHandle>,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    cancel.cancelled().await;
    if let Err(err) = stream.close().await {
        tracing::debug!(exchange = "kucoin", error = %err, "stream close failed");
    }
    tracing::debug!(exchange = "kucoin", "stream closed");
    Err(PipelineError::Cancelled)
}
