//! In-Memory Stream Transport
//!
//! Scripted [`StreamHandle`] for tests and dry runs. The [`MemoryRemote`]
//! plays the server: it queues inbound frames, inspects written frames,
//! and can close the connection from either side.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{StreamConnector, StreamHandle, TransportError};

type Inbound = Result<Vec<u8>, TransportError>;

/// Client end of an in-memory stream.
#[derive(Debug)]
pub struct MemoryStream {
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Inbound>>,
    written: Arc<Mutex<Vec<String>>>,
    write_error: Arc<Mutex<Option<TransportError>>>,
    closed: CancellationToken,
}

/// Server end of an in-memory stream.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    inbound: mpsc::UnboundedSender<Inbound>,
    written: Arc<Mutex<Vec<String>>>,
    write_error: Arc<Mutex<Option<TransportError>>>,
    closed: CancellationToken,
}

impl MemoryStream {
    /// Create a connected client/server pair.
    #[must_use]
    pub fn pair() -> (Arc<Self>, MemoryRemote) {
        let (tx, rx) = mpsc::unbounded_channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let write_error = Arc::new(Mutex::new(None));
        let closed = CancellationToken::new();

        let stream = Arc::new(Self {
            inbound: AsyncMutex::new(rx),
            written: Arc::clone(&written),
            write_error: Arc::clone(&write_error),
            closed: closed.clone(),
        });
        let remote = MemoryRemote {
            inbound: tx,
            written,
            write_error,
            closed,
        };
        (stream, remote)
    }
}

impl MemoryRemote {
    /// Queue a text frame.
    pub fn push_text(&self, frame: &str) {
        self.push_frame(frame.as_bytes().to_vec());
    }

    /// Queue a raw frame.
    pub fn push_frame(&self, frame: Vec<u8>) {
        let _ = self.inbound.send(Ok(frame));
    }

    /// Queue a read error.
    pub fn push_error(&self, err: TransportError) {
        let _ = self.inbound.send(Err(err));
    }

    /// Close from the server side once queued frames are read.
    pub fn close_from_peer(&self) {
        self.push_error(TransportError::PeerClosed);
    }

    /// Close from the client side, as `StreamHandle::close` does.
    pub fn close_locally(&self) {
        self.closed.cancel();
    }

    /// Check if the client closed the stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Frames written by the client so far.
    #[must_use]
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    /// Make every subsequent client write fail with `err`.
    pub fn fail_writes(&self, err: TransportError) {
        *self.write_error.lock() = Some(err);
    }
}

#[async_trait]
impl StreamHandle for MemoryStream {
    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::Closed),
            next = async { self.inbound.lock().await.recv().await } => {
                next.unwrap_or(Err(TransportError::PeerClosed))
            }
        }
    }

    async fn write(&self, frame: String) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if let Some(err) = self.write_error.lock().clone() {
            return Err(err);
        }
        self.written.lock().push(frame);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }
}

/// Hands out pre-built streams in order and records requested URLs.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    streams: Mutex<VecDeque<Arc<MemoryStream>>>,
    opened: Mutex<Vec<String>>,
}

impl MemoryConnector {
    /// Create a connector serving `streams`, one per `open`.
    #[must_use]
    pub fn new(streams: Vec<Arc<MemoryStream>>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Queue another stream.
    pub fn push(&self, stream: Arc<MemoryStream>) {
        self.streams.lock().push_back(stream);
    }

    /// URLs opened so far.
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl StreamConnector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<Arc<dyn StreamHandle>, TransportError> {
        self.opened.lock().push(url.to_string());
        let stream = self.streams.lock().pop_front();
        match stream {
            Some(stream) => Ok(stream),
            None => Err(TransportError::Io(format!("no stream scripted for {url}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (stream, remote) = MemoryStream::pair();
        remote.push_text("hello");
        assert_eq!(stream.read().await.unwrap(), b"hello");

        stream.write("pong".to_string()).await.unwrap();
        assert_eq!(remote.written(), vec!["pong"]);
    }

    #[tokio::test]
    async fn close_unblocks_read_and_rejects_writes() {
        let (stream, remote) = MemoryStream::pair();
        stream.close().await.unwrap();

        assert_eq!(stream.read().await, Err(TransportError::Closed));
        assert_eq!(stream.write("x".into()).await, Err(TransportError::Closed));
        assert!(remote.is_closed());
    }

    #[tokio::test]
    async fn dropped_remote_reads_as_peer_close() {
        let (stream, remote) = MemoryStream::pair();
        drop(remote);
        assert_eq!(stream.read().await, Err(TransportError::PeerClosed));
    }
}
