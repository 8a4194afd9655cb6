//! Session Bootstrapper
//!
//! Performs the KuCoin handshake:
//!
//! 1. `POST bullet-public` for a one-time token and stream endpoint
//! 2. Open `{endpoint}?token={token}`
//! 3. Read exactly one frame and require a `welcome` envelope
//!
//! Cancellation during any step surfaces as `PipelineError::Cancelled`,
//! never as a bootstrap failure.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::{RestClient, RestRequest, StreamConnector, StreamHandle};
use crate::infrastructure::kucoin::codec::{Inbound, decode_frame};
use crate::infrastructure::kucoin::messages::{BulletResponse, SUCCESS_CODE};

/// An established stream session.
pub struct Session {
    /// Open stream.
    pub stream: Arc<dyn StreamHandle>,
    /// Server-advertised keep-alive interval (whole seconds).
    pub keep_alive: Duration,
    /// Endpoint the stream was opened on (without token).
    pub endpoint: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("keep_alive", &self.keep_alive)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Runs the handshake against a REST base URL.
pub struct Bootstrapper {
    rest: Arc<dyn RestClient>,
    connector: Arc<dyn StreamConnector>,
    rest_base_url: String,
}

impl Bootstrapper {
    /// Create a bootstrapper. `rest_base_url` ends with `/`.
    #[must_use]
    pub fn new(
        rest: Arc<dyn RestClient>,
        connector: Arc<dyn StreamConnector>,
        rest_base_url: impl Into<String>,
    ) -> Self {
        Self {
            rest,
            connector,
            rest_base_url: rest_base_url.into(),
        }
    }

    /// Perform the handshake.
    ///
    /// # Errors
    ///
    /// Returns `Bootstrap` on any handshake failure and `Cancelled` if
    /// `cancel` fires first.
    pub async fn bootstrap(&self, cancel: &CancellationToken) -> Result<Session, PipelineError> {
        let request = RestRequest::post(format!("{}bullet-public", self.rest_base_url));

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            response = self.rest.execute(&request) => {
                response.map_err(|err| PipelineError::bootstrap("bullet-public request", err))?
            }
        };
        if !response.is_success() {
            return Err(PipelineError::Bootstrap(format!(
                "bullet-public returned status {}",
                response.status
            )));
        }

        let bullet: BulletResponse = response
            .json()
            .map_err(|err| PipelineError::Bootstrap(format!("bullet-public body: {err}")))?;
        if bullet.code != SUCCESS_CODE {
            return Err(PipelineError::Bootstrap(format!(
                "bullet-public returned code {}",
                bullet.code
            )));
        }
        let Some(data) = bullet.data else {
            return Err(PipelineError::Bootstrap("bullet-public returned no data".into()));
        };
        let Some(server) = data.instance_servers.into_iter().next() else {
            return Err(PipelineError::Bootstrap(
                "not able to get websocket server details".into(),
            ));
        };

        let keep_alive = Duration::from_secs(server.ping_interval_ms / 1000);
        if keep_alive.is_zero() {
            return Err(PipelineError::Bootstrap(format!(
                "ping interval of {}ms is too short",
                server.ping_interval_ms
            )));
        }

        let url = format!("{}?token={}", server.endpoint, data.token);
        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            stream = self.connector.open(&url) => {
                stream.map_err(|err| PipelineError::bootstrap("stream open", err))?
            }
        };

        if let Err(err) = await_welcome(stream.as_ref(), cancel).await {
            let _ = stream.close().await;
            return Err(err);
        }

        tracing::info!(
            exchange = "kucoin",
            endpoint = %server.endpoint,
            keep_alive_secs = keep_alive.as_secs(),
            "websocket connected"
        );

        Ok(Session {
            stream,
            keep_alive,
            endpoint: server.endpoint,
        })
    }
}

async fn await_welcome(
    stream: &dyn StreamHandle,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    let frame = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(PipelineError::Cancelled),
        frame = stream.read() => frame.map_err(|err| PipelineError::bootstrap("welcome read", err))?,
    };
    if frame.is_empty() {
        return Err(PipelineError::Bootstrap(
            "not able to connect websocket server: empty welcome frame".into(),
        ));
    }

    match decode_frame(&frame) {
        Ok(Inbound::Welcome) => Ok(()),
        Ok(other) => Err(PipelineError::Bootstrap(format!(
            "not able to connect websocket server: expected welcome, got {other:?}"
        ))),
        Err(err) => Err(PipelineError::Bootstrap(format!("welcome frame: {err}"))),
    }
}

// =============================================================================
// Tests
// =============================================================================
