//! Payment gateway settlement service - Main entry point.

mod config;
mod error;

use crate::config::{Config, LogFormat};
use crate::error::AppResult;
use anyhow::Context;
use chain_client::AlloyChainClient;
use secrecy::ExposeSecret;
use settlement_pipeline::{MemoryLedger, Pipeline, PipelineDeps};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.log_level, config.log_format);

    info!("Starting payment gateway settlement service...");

    // Initialize clients
    let chain = AlloyChainClient::connect(
        config.chain.ws_url.expose_secret(),
        config.chain.log_batch_size,
    )
    .await?;

    if chain.health_check().await {
        info!("Chain node healthy - Network: {}", config.chain.network);
    } else {
        warn!("Chain node health check failed - subscriptions may stall");
    }

    let ledger = match &config.ledger.storage_path {
        Some(path) => MemoryLedger::open(path.clone()).await?,
        None => {
            warn!("No ledger storage path configured - ledger is memory-only");
            MemoryLedger::new()
        }
    };

    let webhook_client = config.webhook.build_client()?;

    // Start the pipeline
    let deps = PipelineDeps {
        rpc: Arc::new(chain),
        payments: ledger.clone(),
        sessions: ledger.clone(),
        subscriptions: ledger.clone(),
        webhook_client,
    };
    let pipeline = Pipeline::start(&config.pipeline_config(), deps).await?;

    info!(
        "Watching contract {} from block {}",
        config.chain.contract_address, config.chain.start_block
    );

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");

    pipeline.shutdown().await;
    ledger.persist().await?;

    info!("Shut down cleanly");
    Ok(())
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
