//! Webhook delivery.

use super::settle;
use crate::error::PipelineError;
use crate::types::WebhookJob;
use async_trait::async_trait;
use job_queue::{Job, JobHandler};
use tracing::{error, info, warn};
use webhook_client::{DeliveryReceipt, WebhookClient, WebhookEnvelope};

/// Envelope for a delivery. Every retry of one job sends the same id
/// and timestamp.
pub fn envelope_for(job: &WebhookJob) -> Result<WebhookEnvelope, PipelineError> {
    Ok(WebhookEnvelope {
        id: job.delivery_id.clone(),
        kind: job.event.to_string(),
        timestamp: job.created_at,
        data: serde_json::to_value(&job.payload)?,
    })
}

/// Sends signed webhook deliveries.
pub struct WebhookDeliveryProcessor {
    client: WebhookClient,
}

impl WebhookDeliveryProcessor {
    pub fn new(client: WebhookClient) -> Self {
        Self { client }
    }

    /// Deliver once. Transport failures and non-2xx responses are errors.
    pub async fn process(&self, job: &WebhookJob) -> Result<DeliveryReceipt, PipelineError> {
        let envelope = envelope_for(job)?;
        let receipt = self
            .client
            .deliver(&job.url, &envelope, job.secret.as_deref())
            .await?;

        info!(
            subscription_id = %job.subscription_id,
            event = %job.event,
            status = receipt.status,
            "Webhook delivered"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl JobHandler<WebhookJob> for WebhookDeliveryProcessor {
    type Error = PipelineError;

    async fn handle(&self, job: &Job<WebhookJob>) -> Result<(), PipelineError> {
        let result = self.process(&job.data).await.map(|_| ());

        if let Err(e) = &result {
            if job.is_final_attempt() {
                error!(
                    job_id = %job.id,
                    subscription_id = %job.data.subscription_id,
                    url = %job.data.url,
                    attempts = job.attempts_made,
                    "Webhook delivery abandoned, subscription remains active: {}",
                    e
                );
            } else {
                warn!(
                    job_id = %job.id,
                    attempt = job.attempts_made,
                    "Webhook delivery failed, will retry: {}",
                    e
                );
            }
        }

        settle("webhooks", &job.id, result)
    }
}
