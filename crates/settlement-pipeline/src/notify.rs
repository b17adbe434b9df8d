//! Fan-out of domain events to merchant webhook subscriptions.

use crate::error::PipelineError;
use crate::ledger::{SessionGateway, SubscriptionGateway};
use crate::types::{EventKind, Payment, WebhookJob, WebhookPayload};
use chrono::Utc;
use job_queue::JobQueue;
use std::sync::Arc;
use tracing::{debug, info};

/// Enqueues one delivery job per active subscription for a payment event.
#[derive(Clone)]
pub struct WebhookNotifier {
    subscriptions: Arc<dyn SubscriptionGateway>,
    sessions: Arc<dyn SessionGateway>,
    queue: JobQueue<WebhookJob>,
}

impl WebhookNotifier {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionGateway>,
        sessions: Arc<dyn SessionGateway>,
        queue: JobQueue<WebhookJob>,
    ) -> Self {
        Self {
            subscriptions,
            sessions,
            queue,
        }
    }

    /// Notify every active subscription of the payment's merchant that
    /// listens for `kind`. Returns the number of newly enqueued deliveries.
    ///
    /// Delivery jobs are keyed by (subscription, kind, payment), so calling
    /// this again for the same event enqueues nothing.
    pub async fn notify(&self, kind: EventKind, payment: &Payment) -> Result<usize, PipelineError> {
        let subscriptions = self
            .subscriptions
            .find_active(&payment.merchant_id, kind)
            .await?;

        if subscriptions.is_empty() {
            debug!(payment_id = %payment.id, event = %kind, "No active webhook subscriptions");
            return Ok(0);
        }

        let checkout_session = self
            .sessions
            .find_by_id(&payment.checkout_session_id)
            .await?;
        let payload = WebhookPayload {
            payment: payment.clone(),
            checkout_session,
        };

        let mut enqueued = 0;
        for subscription in subscriptions.into_iter().filter(|s| s.wants(kind)) {
            let job = WebhookJob {
                delivery_id: uuid::Uuid::new_v4().to_string(),
                subscription_id: subscription.id,
                url: subscription.url,
                event: kind,
                payload: payload.clone(),
                secret: subscription.secret,
                created_at: Utc::now(),
            };

            if self.queue.enqueue(Some(job.job_id()), job).await?.is_added() {
                enqueued += 1;
            }
        }

        info!(payment_id = %payment.id, event = %kind, enqueued, "Webhook deliveries enqueued");
        Ok(enqueued)
    }
}
