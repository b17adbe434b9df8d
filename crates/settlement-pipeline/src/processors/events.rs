//! Reconciles settlement events to checkout sessions.

use super::settle;
use crate::error::{LedgerError, PipelineError};
use crate::ledger::{PaymentGateway, SessionGateway};
use crate::notify::WebhookNotifier;
use crate::types::{ChainEventJob, CheckoutSession, EventKind, Payment};
use alloy::primitives::Address;
use async_trait::async_trait;
use job_queue::{Job, JobHandler};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Records settlement events as payments awaiting confirmation.
pub struct ChainEventProcessor {
    network: String,
    sessions: Arc<dyn SessionGateway>,
    payments: Arc<dyn PaymentGateway>,
    notifier: WebhookNotifier,
}

fn same_address(stored: &str, observed: &Address) -> bool {
    Address::from_str(stored).is_ok_and(|a| &a == observed)
}

impl ChainEventProcessor {
    pub fn new(
        network: impl Into<String>,
        sessions: Arc<dyn SessionGateway>,
        payments: Arc<dyn PaymentGateway>,
        notifier: WebhookNotifier,
    ) -> Self {
        Self {
            network: network.into(),
            sessions,
            payments,
            notifier,
        }
    }

    /// Reconcile one event and record its payment.
    ///
    /// The event's invoice id must be the hash of a checkout session id on
    /// this network, paid to the session's receiving address in the
    /// session's currency. Re-processing an already recorded event returns
    /// the existing payment.
    #[instrument(skip(self, job), fields(tx_hash = %job.event.transaction_hash, event = %job.event_name))]
    pub async fn process(&self, job: &ChainEventJob) -> Result<Payment, PipelineError> {
        let event = &job.event;

        let session = self
            .sessions
            .find_by_invoice_id(&event.invoice_id)
            .await?
            .ok_or_else(|| {
                PipelineError::ReconciliationMiss(format!(
                    "no checkout session for invoice {}",
                    event.invoice_id
                ))
            })?;

        self.check_session(&session, job)?;

        if let Some(existing) = self.payments.find_by_session(&session.id).await? {
            return self.existing_payment(existing, job).await;
        }

        if event.gross_amount < session.amount {
            warn!(
                session_id = %session.id,
                expected = %session.amount,
                received = %event.gross_amount,
                "Settlement below session amount"
            );
        }

        let payment = match self
            .payments
            .create(Payment::from_settlement(&session, event))
            .await
        {
            Ok(payment) => payment,
            Err(LedgerError::Conflict(_)) => {
                let existing = self
                    .payments
                    .find_by_session(&session.id)
                    .await?
                    .ok_or_else(|| PipelineError::PaymentNotFound(session.id.clone()))?;
                return self.existing_payment(existing, job).await;
            }
            Err(e) => return Err(e.into()),
        };

        self.sessions.mark_paid(&session.id).await?;

        info!(
            payment_id = %payment.id,
            session_id = %session.id,
            block = %event.block_number,
            "Payment recorded, waiting for confirmations"
        );

        self.notifier.notify(EventKind::PaymentCreated, &payment).await?;
        Ok(payment)
    }

    fn check_session(&self, session: &CheckoutSession, job: &ChainEventJob) -> Result<(), PipelineError> {
        let event = &job.event;

        if !session.network.eq_ignore_ascii_case(&self.network) {
            return Err(PipelineError::ReconciliationMiss(format!(
                "session {} is on {}, event observed on {}",
                session.id, session.network, self.network
            )));
        }

        if !same_address(&session.receiving_address, &event.merchant_address) {
            return Err(PipelineError::ReconciliationMiss(format!(
                "session {} pays {}, event paid {}",
                session.id, session.receiving_address, event.merchant_address
            )));
        }

        let token_matches = match (&session.token_address, &event.token_address) {
            (None, None) => true,
            (Some(expected), Some(observed)) => same_address(expected, observed),
            _ => false,
        };
        if !token_matches {
            return Err(PipelineError::ReconciliationMiss(format!(
                "session {} currency does not match {} event",
                session.id, job.event_name
            )));
        }

        Ok(())
    }

    /// A session can only be settled once; a repeat of the same transaction
    /// is a duplicate, anything else is a miss.
    async fn existing_payment(&self, existing: Payment, job: &ChainEventJob) -> Result<Payment, PipelineError> {
        let tx_hash = job.event.transaction_hash.to_string();
        let same_tx = existing
            .tx_hash
            .as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(&tx_hash));

        if !same_tx {
            return Err(PipelineError::ReconciliationMiss(format!(
                "session {} already settled by payment {}",
                existing.checkout_session_id, existing.id
            )));
        }

        // Finish side effects a previous attempt may have missed.
        self.sessions.mark_paid(&existing.checkout_session_id).await?;
        self.notifier.notify(EventKind::PaymentCreated, &existing).await?;
        Ok(existing)
    }
}

#[async_trait]
impl JobHandler<ChainEventJob> for ChainEventProcessor {
    type Error = PipelineError;

    async fn handle(&self, job: &Job<ChainEventJob>) -> Result<(), PipelineError> {
        let result = self.process(&job.data).await.map(|_| ());
        settle("chain-events", &job.id, result)
    }
}
