//! Application Services
//!
//! Venue-independent building blocks of the ingestion pipeline.
//!
//! - `fanout`: Per-producer batching and hand-off to sinks
//! - `delivery`: Queue-draining sink delivery tasks
//! - `task_group`: Fail-fast group of attempt tasks
//! - `supervisor`: Outer retry loop

/// Batching fan-out and batch outlets.
pub mod fanout;

/// Sink delivery tasks.
pub mod delivery;

/// Fail-fast task group.
pub mod task_group;

/// Retry supervisor.
pub mod supervisor;
