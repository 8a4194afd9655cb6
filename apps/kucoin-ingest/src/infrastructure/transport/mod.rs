//! Transports
//!
//! Implementations of the stream and request/response ports.

mod http;
mod memory;
mod websocket;

pub use http::HttpRestClient;
pub use memory::{MemoryConnector, MemoryRemote, MemoryStream};
pub use websocket::{WebSocketConnector, WebSocketHandle};
