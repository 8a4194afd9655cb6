//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the pipeline interacts with external systems.

/// Attempt outcome taxonomy.
pub mod error;

/// Port interfaces for external systems (stream, REST, sinks).
pub mod ports;

/// Batching, delivery, task group and retry services.
pub mod services;
