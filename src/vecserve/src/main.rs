//! vecserve: text-embedding inference service.
//!
//! Main entry point: loads configuration and the model, starts the
//! scheduler and the HTTP server, and drains both on shutdown.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use vecserve_api::{ApiServer, AppState};
use vecserve_batching::{
    AccumulatorLimits, BatchAccumulator, EmbeddingService, Scheduler, SchedulerOptions,
};
use vecserve_core::config::AppConfig;
use vecserve_core::inference::ModelResource;
use vecserve_encoder::EncoderEngine;

#[derive(Parser, Debug)]
#[command(name = "vecserve")]
#[command(about = "Text-embedding inference service with cross-request micro-batching")]
#[command(version)]
struct Cli {
    /// Optional TOML config file (environment variables still override it)
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Bind address (overrides config)
    #[arg(long, env = "VECSERVE__API__HOST")]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "VECSERVE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Model weights file (overrides config)
    #[arg(long, env = "VECSERVE__MODEL__MODEL_PATH")]
    model_path: Option<String>,

    /// Maximum texts per model call (overrides config)
    #[arg(long, env = "VECSERVE__BATCHING__MAX_BATCH_SIZE")]
    max_batch_size: Option<usize>,

    /// Maximum time a partial batch waits for company, in ms (overrides config)
    #[arg(long, env = "VECSERVE__BATCHING__MAX_BATCH_WAIT_MS")]
    max_batch_wait_ms: Option<u64>,

    /// Per-request wait limit, in ms (overrides config)
    #[arg(long, env = "VECSERVE__BATCHING__REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vecserve=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("vecserve starting up");

    // Load configuration
    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    };

    // Apply CLI overrides
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(path) = cli.model_path {
        config.model.model_path = path;
    }
    if let Some(size) = cli.max_batch_size {
        config.batching.max_batch_size = size;
    }
    if let Some(wait) = cli.max_batch_wait_ms {
        config.batching.max_batch_wait_ms = wait;
    }
    if let Some(timeout) = cli.request_timeout_ms {
        config.batching.request_timeout_ms = timeout;
    }

    config.validate()?;

    info!(
        http_port = config.api.http_port,
        max_batch_size = config.batching.max_batch_size,
        max_batch_wait_ms = config.batching.max_batch_wait_ms,
        request_timeout_ms = config.batching.request_timeout_ms,
        max_pending_items = config.batching.max_pending_items,
        "Configuration loaded"
    );

    // Load the model; it is handed to the scheduler and never shared.
    let mut engine = EncoderEngine::new(&config.model)?;
    engine.warm_up()?;
    info!(model = engine.model_name(), dimension = engine.dimension(), "Model ready");

    let accumulator = Arc::new(BatchAccumulator::new(AccumulatorLimits::from(
        &config.batching,
    )));
    let scheduler = Scheduler::spawn(
        engine,
        accumulator.clone(),
        SchedulerOptions::from(&config.batching),
    );

    let state = AppState {
        service: EmbeddingService::from_config(accumulator, &config.batching),
        scheduler_state: scheduler.subscribe(),
        max_request_texts: config.api.max_request_texts,
    };
    let api_server = ApiServer::new(config.clone(), state);

    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("vecserve is ready to serve traffic");

    // Serve until Ctrl-C; HTTP drains first, then the scheduler.
    let served = api_server.start_http(shutdown_signal()).await;
    scheduler.shutdown().await;
    served?;

    info!("vecserve stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
