//! Pipeline error types.

use chain_client::ChainError;
use job_queue::QueueError;
use thiserror::Error;
use webhook_client::WebhookError;

/// A chain log that does not match the settlement event schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid address in {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("Invalid hash in {field}: {value}")]
    InvalidHash { field: &'static str, value: String },

    #[error("Invalid number in {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

/// Errors from the payment/session/subscription stores.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

/// Errors that can occur in the settlement pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed chain log.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Chain event with no matching checkout session.
    #[error("Reconciliation miss: {0}")]
    ReconciliationMiss(String),

    /// Payment referenced by a job no longer exists.
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No bytecode at the configured contract address.
    #[error("No contract deployed at {0}")]
    ContractNotDeployed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether a queue retry can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Ledger(e) => matches!(e, LedgerError::Storage(_)),
            PipelineError::Chain(_) => true,
            PipelineError::Webhook(e) => !matches!(e, WebhookError::Signing(_) | WebhookError::Json(_)),
            PipelineError::Queue(e) => !matches!(e, QueueError::Closed(_)),
            PipelineError::Validation(_)
            | PipelineError::ReconciliationMiss(_)
            | PipelineError::PaymentNotFound(_)
            | PipelineError::Serialization(_)
            | PipelineError::ContractNotDeployed(_)
            | PipelineError::Config(_) => false,
        }
    }
}
