//! Webhook delivery errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Delivery to {0} timed out")]
    Timeout(String),

    #[error("Endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Signing failed: {0}")]
    Signing(String),
}
