//! Signed webhook delivery.

mod client;
mod error;
mod types;

pub use client::{canonical_json, sign_payload, WebhookClient, DEFAULT_TIMEOUT, SIGNATURE_HEADER};
pub use error::WebhookError;
pub use types::*;
