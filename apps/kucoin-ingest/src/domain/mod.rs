//! Domain Layer - Core ingestion types and business rules.
//!
//! This layer contains the market configuration, canonical records and
//! the per-attempt subscription index. No I/O happens here.

/// Market and channel configuration types.
pub mod market;

/// Canonical ticker and trade records.
pub mod streaming;

/// Per-attempt subscription index and push throttle.
pub mod subscription;
