//! KuCoin Ingest Binary
//!
//! Loads the configuration and runs the supervised ingestion pipeline
//! until retries run out or a shutdown signal arrives.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kucoin-ingest
//! ```
//!
//! # Environment Variables
//!
//! - `KUCOIN_INGEST_CONFIG`: Path to the YAML configuration (default: config.yaml)
//! - `KUCOIN_INGEST_METRICS_PORT`: Prometheus exporter port; 0 disables the
//!   listener (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry span export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: kucoin-ingest)
//! - `RUST_LOG`: Log filter (default: kucoin_ingest=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kucoin_ingest::infrastructure::sinks::{
    ElasticSearchSink, ElasticSearchTarget, MySqlSink, TerminalSink,
};
use kucoin_ingest::infrastructure::telemetry;
use kucoin_ingest::infrastructure::transport::{HttpRestClient, WebSocketConnector};
use kucoin_ingest::{
    AppConfig, PipelineDeps, RestClient, SinkRegistry, SupervisorError, init_metrics, load_config,
    run,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting KuCoin ingest");

    let metrics_port = std::env::var("KUCOIN_INGEST_METRICS_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(0);
    let _metrics_handle = init_metrics(metrics_port).context("metrics setup failed")?;

    let config_path = std::env::var("KUCOIN_INGEST_CONFIG").ok();
    let config = load_config(config_path.as_deref()).context("configuration error")?;
    log_config(&config);

    let deps = build_deps(&config)?;

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let policy = config.retry.policy();
    match run(config.markets, &policy, &config.connection, deps, &shutdown_token).await {
        Ok(()) | Err(SupervisorError::Cancelled { .. }) => {
            tracing::info!("KuCoin ingest stopped");
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "KuCoin ingest terminated");
            Err(err.into())
        }
    }
}

/// Build transports and the sink registry from configuration.
fn build_deps(config: &AppConfig) -> anyhow::Result<PipelineDeps> {
    let connection = &config.connection;

    let rest: Arc<dyn RestClient> = Arc::new(
        HttpRestClient::new(Duration::from_secs(connection.rest.request_timeout_sec))
            .context("HTTP client setup failed")?,
    );
    let connector = Arc::new(WebSocketConnector::new(Duration::from_secs(
        connection.websocket.connect_timeout_sec,
    )));

    let mut sinks = SinkRegistry::new().with(Arc::new(TerminalSink::stdout()));
    if let Some(es) = &connection.elastic_search {
        let es_rest: Arc<dyn RestClient> = Arc::new(
            HttpRestClient::new(Duration::from_secs(es.request_timeout_sec))
                .context("Elasticsearch HTTP client setup failed")?,
        );
        let target = ElasticSearchTarget {
            url: es.url.clone(),
            index_name: es.index_name.clone(),
        };
        sinks = sinks.with(Arc::new(ElasticSearchSink::new(es_rest, target)));
    }
    if let Some(mysql) = &connection.mysql {
        let acquire_timeout = Duration::from_secs(mysql.connect_timeout_sec);
        let sink = MySqlSink::connect_lazy(&mysql.url, acquire_timeout)
            .context("MySQL pool setup failed")?;
        sinks = sinks.with(Arc::new(sink));
    }

    Ok(PipelineDeps {
        rest,
        connector,
        sinks,
    })
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    let channels: usize = config.markets.iter().map(|m| m.channels.len()).sum();
    tracing::info!(
        markets = config.markets.len(),
        channels,
        retries = config.retry.number,
        retry_gap_sec = config.retry.gap_sec,
        retry_reset_sec = config.retry.reset_sec,
        elastic_search = config.connection.elastic_search.is_some(),
        mysql = config.connection.mysql.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        rest_base_url = %config.connection.venue.rest_base_url,
        queue_capacity = config.connection.queue_capacity,
        "Connection settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT) and cancel the pipeline.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
