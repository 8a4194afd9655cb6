//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamConnector` / `StreamHandle`: Persistent stream to the venue
//! - `RestClient`: One-shot request/response calls
//! - `Sink`: Storage systems receiving committed batches

mod rest_port;
mod sink_port;
mod stream_port;

pub use rest_port::{HttpMethod, RestClient, RestRequest, RestResponse};
pub use sink_port::{Sink, SinkError, SinkRegistry};
pub use stream_port::{StreamConnector, StreamHandle, TransportError};
