//! WebSocket Transport
//!
//! [`StreamConnector`] over `tokio-tungstenite`. The socket is split so a
//! writer and the reader never wait on each other; each half sits behind
//! its own async mutex.
//!
//! `close()` trips a token that every in-flight and future `read`/`write`
//! races against, so a local close always unblocks I/O with
//! [`TransportError::Closed`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{StreamConnector, StreamHandle, TransportError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket streams.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            close_timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<Arc<dyn StreamHandle>, TransportError> {
        let connected = tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?;
        let (socket, _response) = connected.map_err(|err| map_error(&err))?;
        let (sink, stream) = socket.split();

        Ok(Arc::new(WebSocketHandle {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
            close_timeout: self.close_timeout,
        }))
    }
}

/// One open WebSocket.
pub struct WebSocketHandle {
    sink: Mutex<SplitSink<Socket, Message>>,
    stream: Mutex<SplitStream<Socket>>,
    closed: CancellationToken,
    close_timeout: Duration,
}

impl std::fmt::Debug for WebSocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketHandle")
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamHandle for WebSocketHandle {
    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        let next = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(TransportError::Closed),
            next = async { self.stream.lock().await.next().await } => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => Ok(text.as_bytes().to_vec()),
            Some(Ok(Message::Binary(data))) => Ok(data.to_vec()),
            // Control frames carry no data; tungstenite answers pings itself.
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Ok(Vec::new()),
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "server sent close frame");
                Err(TransportError::PeerClosed)
            }
            Some(Err(err)) => Err(self.classify(&err)),
            None => Err(self.classify_end()),
        }
    }

    async fn write(&self, frame: String) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::Closed),
            sent = async { self.sink.lock().await.send(Message::Text(frame.into())).await } => {
                sent.map_err(|err| self.classify(&err))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        match tokio::time::timeout(self.close_timeout, async {
            self.sink.lock().await.close().await
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => match err {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => Ok(()),
                other => Err(map_error(&other)),
            },
            Err(_) => Err(TransportError::Timeout(self.close_timeout)),
        }
    }
}

impl WebSocketHandle {
    fn classify(&self, err: &tungstenite::Error) -> TransportError {
        if self.closed.is_cancelled() {
            TransportError::Closed
        } else {
            map_error(err)
        }
    }

    fn classify_end(&self) -> TransportError {
        if self.closed.is_cancelled() {
            TransportError::Closed
        } else {
            TransportError::PeerClosed
        }
    }
}

fn map_error(err: &tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::PeerClosed
        }
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            TransportError::PeerClosed
        }
        other => TransportError::Io(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_closed_maps_to_peer_closed() {
        assert_eq!(
            map_error(&tungstenite::Error::ConnectionClosed),
            TransportError::PeerClosed
        );
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(map_error(&tungstenite::Error::Io(eof)), TransportError::PeerClosed);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails() {
        let connector = WebSocketConnector::new(Duration::from_secs(2));
        let result = connector.open("ws://127.0.0.1:1/").await;
        assert!(result.is_err());
    }
}
