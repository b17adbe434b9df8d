//! Confirmation depth tracking.

use super::settle;
use crate::error::PipelineError;
use crate::ledger::PaymentGateway;
use crate::notify::WebhookNotifier;
use crate::policy::min_confirmations;
use crate::types::{ConfirmationJob, EventKind, PaymentStatus, PaymentUpdate};
use async_trait::async_trait;
use chain_client::ChainRpc;
use chrono::Utc;
use job_queue::{Job, JobHandler};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What a confirmation job did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Transaction not mined yet; a later block retries.
    ReceiptPending,
    /// Depth recorded, threshold not reached.
    Waiting { confirmations: u64 },
    /// Payment is confirmed. `transitioned` is set only for the job that
    /// made the transition.
    Confirmed { confirmations: u64, transitioned: bool },
    /// Transaction reverted; the payment was marked failed.
    Reverted,
    /// Payment already in a terminal state other than confirmed.
    Skipped(PaymentStatus),
}

pub struct ConfirmationProcessor {
    rpc: Arc<dyn ChainRpc>,
    payments: Arc<dyn PaymentGateway>,
    notifier: WebhookNotifier,
}

impl ConfirmationProcessor {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        payments: Arc<dyn PaymentGateway>,
        notifier: WebhookNotifier,
    ) -> Self {
        Self {
            rpc,
            payments,
            notifier,
        }
    }

    /// Recompute the payment's depth at `job.current_block_number` and
    /// confirm it once the network threshold is met.
    ///
    /// The completion webhook is requested whenever the payment ends up
    /// confirmed, not only on the transition. Webhook job ids make the
    /// repeat a no-op, and a run that stored the transition but stopped
    /// before enqueueing is completed by the next one.
    #[instrument(skip(self, job), fields(payment_id = %job.payment_id, block = %job.current_block_number))]
    pub async fn process(&self, job: &ConfirmationJob) -> Result<ConfirmationOutcome, PipelineError> {
        let Some(receipt) = self.rpc.get_transaction_receipt(&job.tx_hash).await? else {
            debug!(tx_hash = %job.tx_hash, "Receipt not available yet");
            return Ok(ConfirmationOutcome::ReceiptPending);
        };

        let payment = self
            .payments
            .find_by_id(&job.payment_id)
            .await?
            .ok_or_else(|| PipelineError::PaymentNotFound(job.payment_id.clone()))?;

        if payment.status.is_terminal() && payment.status != PaymentStatus::Confirmed {
            debug!(status = ?payment.status, "Payment already final");
            return Ok(ConfirmationOutcome::Skipped(payment.status));
        }

        if !receipt.success {
            warn!(tx_hash = %job.tx_hash, "Settlement transaction reverted");
            self.payments
                .update(
                    &payment.id,
                    PaymentUpdate {
                        status: Some(PaymentStatus::Failed),
                        ..PaymentUpdate::default()
                    },
                )
                .await?;
            return Ok(ConfirmationOutcome::Reverted);
        }

        let confirmations = job.confirmations();
        let required = min_confirmations(&payment.network);

        let mut update = PaymentUpdate {
            confirmations: Some(confirmations),
            ..PaymentUpdate::default()
        };
        if confirmations >= required && payment.status != PaymentStatus::Confirmed {
            update.status = Some(PaymentStatus::Confirmed);
            update.confirmed_at = Some(Utc::now());
        }

        let updated = self.payments.update(&payment.id, update).await?;
        let payment = updated.payment;

        if payment.status != PaymentStatus::Confirmed {
            debug!(confirmations = payment.confirmations, required, "Waiting for confirmations");
            return Ok(ConfirmationOutcome::Waiting {
                confirmations: payment.confirmations,
            });
        }

        if updated.status_changed {
            info!(confirmations = payment.confirmations, required, "Payment confirmed");
        }
        self.notifier
            .notify(EventKind::PaymentCompleted, &payment)
            .await?;

        Ok(ConfirmationOutcome::Confirmed {
            confirmations: payment.confirmations,
            transitioned: updated.status_changed,
        })
    }
}

#[async_trait]
impl JobHandler<ConfirmationJob> for ConfirmationProcessor {
    type Error = PipelineError;

    async fn handle(&self, job: &Job<ConfirmationJob>) -> Result<(), PipelineError> {
        let result = self.process(&job.data).await.map(|_| ());
        settle("confirmations", &job.id, result)
    }
}
