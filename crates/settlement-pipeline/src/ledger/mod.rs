//! Collaborator interfaces for payments, checkout sessions and webhook
//! subscriptions, plus an in-memory implementation of all three.

use crate::error::LedgerError;
use crate::types::{CheckoutSession, EventKind, Payment, PaymentUpdate, WebhookSubscription};
use alloy::primitives::B256;
use async_trait::async_trait;

mod memory;

pub use memory::MemoryLedger;

/// Result of [`PaymentGateway::update`].
#[derive(Debug, Clone)]
pub struct PaymentUpdated {
    pub payment: Payment,
    /// Whether this update moved the payment to a new status.
    pub status_changed: bool,
}

/// Payment persistence.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Payment>, LedgerError>;

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Payment>, LedgerError>;

    /// Payments that have not reached a terminal status.
    async fn find_pending(&self) -> Result<Vec<Payment>, LedgerError>;

    /// Insert a new payment. Fails with `Conflict` if the session already has one.
    async fn create(&self, payment: Payment) -> Result<Payment, LedgerError>;

    /// Apply `update` to the stored payment in a single read-modify-write.
    async fn update(&self, id: &str, update: PaymentUpdate) -> Result<PaymentUpdated, LedgerError>;
}

/// Checkout session lookup.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<CheckoutSession>, LedgerError>;

    async fn find_by_invoice_id(&self, invoice_id: &B256) -> Result<Option<CheckoutSession>, LedgerError>;

    async fn mark_paid(&self, id: &str) -> Result<(), LedgerError>;
}

/// Webhook subscription lookup.
#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    /// Active subscriptions of `merchant_id` that listen for `kind`.
    async fn find_active(
        &self,
        merchant_id: &str,
        kind: EventKind,
    ) -> Result<Vec<WebhookSubscription>, LedgerError>;
}
