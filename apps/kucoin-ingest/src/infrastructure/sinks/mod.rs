//! Sinks
//!
//! Implementations of the [`Sink`](crate::application::ports::Sink) port.

mod elastic_search;
mod memory;
mod metered;
mod mysql;
mod terminal;

pub use elastic_search::{ElasticSearchSink, ElasticSearchTarget};
pub use memory::MemorySink;
pub use metered::{MeteredSink, metered};
pub use mysql::MySqlSink;
pub use terminal::TerminalSink;
