//! Webhook wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body POSTed to a merchant endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Stable per notification; retries reuse it so receivers can deduplicate.
    pub id: String,
    /// Event kind, e.g. `payment.completed`.
    #[serde(rename = "type")]
    pub kind: String,
    /// When the notification was first enqueued.
    pub timestamp: DateTime<Utc>,
    /// Domain payload.
    pub data: serde_json::Value,
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub signed: bool,
}
