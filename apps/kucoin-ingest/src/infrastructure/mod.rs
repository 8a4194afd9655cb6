//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading and validation.
pub mod config;

/// KuCoin market data adapter and pipeline wiring.
pub mod kucoin;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Sink implementations (terminal, Elasticsearch, in-memory).
pub mod sinks;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Stream and HTTP transports.
pub mod transport;
