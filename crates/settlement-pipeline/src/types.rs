//! Core types for the settlement pipeline.

use alloy::primitives::{keccak256, Address, B256, U256};
use chain_client::PaymentEventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Parse a base-10 integer string into a `U256`.
///
/// Only ASCII digits are accepted: no sign, no `0x`, no whitespace.
pub fn parse_decimal(value: &str) -> Option<U256> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    U256::from_str_radix(value, 10).ok()
}

/// Serde for `U256` as a base-10 string.
pub mod decimal {
    use alloy::primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_decimal(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid decimal integer: {}", value)))
    }
}

/// Serde for `Option<U256>` as a base-10 string or null.
pub mod decimal_opt {
    use alloy::primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<U256>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(value) => super::parse_decimal(&value)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid decimal integer: {}", value))),
            None => Ok(None),
        }
    }
}

/// Payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    WaitingForConfirmations,
    Confirmed,
    Underpaid,
    Overpaid,
    Expired,
    Failed,
    Canceled,
}

impl PaymentStatus {
    /// Terminal records are never mutated again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending | PaymentStatus::WaitingForConfirmations)
    }
}

/// Funds received against a checkout session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub merchant_id: String,
    pub checkout_session_id: String,
    pub status: PaymentStatus,
    pub network: String,
    /// Merchant receiving address.
    pub address: String,
    pub payer: Option<String>,
    pub tx_hash: Option<String>,
    /// `None` for native-currency payments.
    pub token_address: Option<String>,
    /// Smallest unit (wei or token base unit).
    #[serde(with = "decimal")]
    pub paid_amount: U256,
    #[serde(with = "decimal")]
    pub fee_amount: U256,
    pub confirmations: u64,
    #[serde(with = "decimal_opt")]
    pub block_number: Option<U256>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Record a reconciled chain event against its checkout session.
    pub fn from_settlement(session: &CheckoutSession, event: &ChainEvent) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            merchant_id: session.merchant_id.clone(),
            checkout_session_id: session.id.clone(),
            status: PaymentStatus::WaitingForConfirmations,
            network: session.network.clone(),
            address: event.merchant_address.to_string(),
            payer: Some(event.payer.to_string()),
            tx_hash: Some(event.transaction_hash.to_string()),
            token_address: event.token_address.map(|t| t.to_string()),
            paid_amount: event.gross_amount,
            fee_amount: event.fee_amount,
            confirmations: 0,
            block_number: Some(event.block_number),
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_native(&self) -> bool {
        self.token_address.is_none()
    }

    /// Apply a partial update in place. Returns whether the status changed.
    ///
    /// `confirmations` never decreases and terminal statuses are final, so
    /// applying updates out of order or twice converges to the same record.
    pub fn apply(&mut self, update: &PaymentUpdate) -> bool {
        let now = Utc::now();

        if let Some(confirmations) = update.confirmations {
            self.confirmations = self.confirmations.max(confirmations);
        }

        if self.tx_hash.is_none() {
            if let Some(tx_hash) = &update.tx_hash {
                self.tx_hash = Some(tx_hash.clone());
            }
        }
        if self.block_number.is_none() {
            self.block_number = update.block_number;
        }

        let mut status_changed = false;
        if let Some(status) = update.status {
            if status != self.status && !self.status.is_terminal() {
                self.status = status;
                if status == PaymentStatus::Confirmed {
                    self.confirmed_at = Some(update.confirmed_at.unwrap_or(now));
                }
                status_changed = true;
            }
        }

        self.updated_at = now;
        status_changed
    }
}

/// Partial payment update applied as one read-modify-write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentUpdate {
    pub status: Option<PaymentStatus>,
    /// Merged with the stored value by `max`.
    pub confirmations: Option<u64>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Only fills an empty field.
    pub tx_hash: Option<String>,
    /// Only fills an empty field.
    pub block_number: Option<U256>,
}

/// Checkout session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Paid,
    Expired,
    Canceled,
}

/// Merchant-created invoice a payment settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub id: String,
    pub merchant_id: String,
    pub network: String,
    /// Address the contract pays out to.
    pub receiving_address: String,
    /// `None` for native-currency sessions.
    pub token_address: Option<String>,
    #[serde(with = "decimal")]
    pub amount: U256,
    pub status: SessionStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CheckoutSession {
    /// On-chain invoice identifier: `keccak256(session id)`.
    pub fn invoice_id(&self) -> B256 {
        invoice_id_for(&self.id)
    }
}

pub fn invoice_id_for(session_id: &str) -> B256 {
    keccak256(session_id.as_bytes())
}

/// Merchant notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "payment.created")]
    PaymentCreated,
    #[serde(rename = "payment.completed")]
    PaymentCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PaymentCreated => "payment.created",
            EventKind::PaymentCompleted => "payment.completed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merchant webhook endpoint registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    pub id: String,
    pub merchant_id: String,
    pub url: String,
    pub events: BTreeSet<EventKind>,
    pub secret: Option<String>,
    pub is_active: bool,
}

impl WebhookSubscription {
    pub fn wants(&self, kind: EventKind) -> bool {
        self.is_active && self.events.contains(&kind)
    }
}

/// Validated settlement event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    pub invoice_id: B256,
    pub payer: Address,
    pub merchant_address: Address,
    #[serde(with = "decimal")]
    pub gross_amount: U256,
    #[serde(with = "decimal")]
    pub fee_amount: U256,
    pub transaction_hash: B256,
    #[serde(with = "decimal")]
    pub block_number: U256,
    /// `None` for `PaidNative`.
    pub token_address: Option<Address>,
}

/// Chain-event queue payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEventJob {
    pub event_name: PaymentEventKind,
    pub event: ChainEvent,
}

impl ChainEventJob {
    /// Identity key: one job per (transaction, invoice).
    pub fn job_id(&self) -> String {
        format!(
            "chain-event-{}-{}",
            self.event.transaction_hash, self.event.invoice_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationJobType {
    #[serde(rename = "process-confirmation")]
    ProcessConfirmation,
}

/// Confirmation queue payload, one per (payment, observed block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationJob {
    pub job_type: ConfirmationJobType,
    pub payment_id: String,
    #[serde(with = "decimal")]
    pub current_block_number: U256,
    pub tx_hash: String,
    #[serde(with = "decimal")]
    pub transaction_block_number: U256,
}

impl ConfirmationJob {
    pub fn new(
        payment_id: impl Into<String>,
        current_block_number: U256,
        tx_hash: impl Into<String>,
        transaction_block_number: U256,
    ) -> Self {
        Self {
            job_type: ConfirmationJobType::ProcessConfirmation,
            payment_id: payment_id.into(),
            current_block_number,
            tx_hash: tx_hash.into(),
            transaction_block_number,
        }
    }

    /// Identity key: `confirmation-{paymentId}-{currentBlockNumber}`.
    pub fn job_id(&self) -> String {
        format!("confirmation-{}-{}", self.payment_id, self.current_block_number)
    }

    /// `max(0, current - transaction block)`, saturating at `u64::MAX`.
    pub fn confirmations(&self) -> u64 {
        let depth = self
            .current_block_number
            .saturating_sub(self.transaction_block_number);
        u64::try_from(depth).unwrap_or(u64::MAX)
    }
}

/// Domain data carried by a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub payment: Payment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_session: Option<CheckoutSession>,
}

/// Webhook delivery queue payload, one per (subscription, domain event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookJob {
    /// Envelope id shared by every retry of this delivery.
    pub delivery_id: String,
    pub subscription_id: String,
    pub url: String,
    pub event: EventKind,
    pub payload: WebhookPayload,
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookJob {
    pub fn job_id(&self) -> String {
        format!(
            "webhook-{}-{}-{}",
            self.subscription_id, self.event, self.payload.payment.id
        )
    }
}
