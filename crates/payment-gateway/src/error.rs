//! Application error types.

use thiserror::Error;

/// Main application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Chain error: {0}")]
    Chain(#[from] chain_client::ChainError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] settlement_pipeline::LedgerError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] webhook_client::WebhookError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] settlement_pipeline::PipelineError),
}

/// Result type alias for application errors.
pub type AppResult<T> = Result<T, AppError>;
