#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! KuCoin Ingest - Market Data Ingestion Pipeline
//!
//! Keeps a supervised connection to KuCoin's public market-data feed,
//! polls REST endpoints for pull-only channels, normalizes tickers and
//! trades, and commits them in batches to the configured sinks.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Configuration and record types
//!   - `market`: Markets, channels, delivery modes, sink kinds
//!   - `streaming`: Normalized tickers, trades and batches
//!   - `subscription`: Per-attempt subscription index and throttle
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Stream, REST and sink interfaces
//!   - `services`: Batch fan-out, delivery, task group, retry supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kucoin`: Bootstrap, keep-alive, subscriber, reader, poller
//!   - `transport`: WebSocket and HTTP clients
//!   - `sinks`: Terminal, Elasticsearch and MySQL writers
//!   - `config`: YAML configuration
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────┐     ┌────────────┐     ┌──────────┐
//! KuCoin WS ──────────►│  Reader  │────►│  Batching  │────►│  Queues  │──► Delivery ──► Sinks
//!    ▲                 └──────────┘     │  Fan-out   │     └──────────┘
//!    │ ping / subscribe                 └────────────┘
//! KeepAlive, Subscriber                        ▲
//!                                              │
//! KuCoin REST ──────────► Poller ──────────────┘ (direct commit)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Configuration and record types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{ChannelInfo, ChannelKind, DeliveryMode, Market, SinkKind};
pub use domain::streaming::{Batch, Ticker, Trade, TradeSide};
pub use domain::subscription::{ConfigIndex, SubscriptionKey, SubscriptionState};

// Errors and supervision
pub use application::error::PipelineError;
pub use application::services::supervisor::{RetryPolicy, SupervisorError};

// Ports
pub use application::ports::{RestClient, Sink, SinkError, SinkRegistry, StreamConnector};

// Pipeline
pub use infrastructure::kucoin::{KucoinPipeline, PipelineDeps, PipelineSettings, run};

// Configuration
pub use infrastructure::config::{AppConfig, ConfigError, ConnectionConfig, load_config};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
