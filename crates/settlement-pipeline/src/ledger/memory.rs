//! In-memory ledger with optional JSON snapshot persistence.

use super::{PaymentGateway, PaymentUpdated, SessionGateway, SubscriptionGateway};
use crate::error::LedgerError;
use crate::types::*;
use alloy::primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

/// Data version for schema migrations.
const DATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerData {
    version: u32,
    payments: HashMap<String, Payment>,
    sessions: HashMap<String, CheckoutSession>,
    subscriptions: HashMap<String, WebhookSubscription>,
}

impl Default for LedgerData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            payments: HashMap::new(),
            sessions: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }
}

/// Payments, sessions and subscriptions held in memory.
///
/// Every payment mutation happens under one write lock, which makes
/// [`PaymentGateway::update`] an atomic read-modify-write.
pub struct MemoryLedger {
    data: RwLock<LedgerData>,
    storage_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl MemoryLedger {
    /// Create an empty, non-persistent ledger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(LedgerData::default()),
            storage_path: None,
            persist_lock: Mutex::new(()),
        })
    }

    /// Open a ledger backed by a snapshot file, loading it if present.
    pub async fn open(storage_path: PathBuf) -> Result<Arc<Self>, LedgerError> {
        let ledger = Arc::new(Self {
            data: RwLock::new(LedgerData::default()),
            storage_path: Some(storage_path),
            persist_lock: Mutex::new(()),
        });

        ledger.load().await?;

        Ok(ledger)
    }

    async fn load(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        if !fs::try_exists(path).await? {
            info!("Ledger not found at {:?}, starting fresh", path);
            return Ok(());
        }

        let bytes = fs::read(path).await?;
        let data: LedgerData = serde_json::from_slice(&bytes)?;

        info!(
            "Loaded ledger: {} payments, {} sessions, {} subscriptions",
            data.payments.len(),
            data.sessions.len(),
            data.subscriptions.len()
        );

        *self.data.write().await = data;
        Ok(())
    }

    /// Save a snapshot, if this ledger is file-backed.
    pub async fn persist(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        let bytes = {
            let data = self.data.read().await;
            serde_json::to_vec(&*data)?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Saved ledger ({} bytes) to {:?}", bytes.len(), path);
        Ok(())
    }

    pub async fn insert_session(&self, session: CheckoutSession) -> Result<(), LedgerError> {
        self.data
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session);
        self.persist().await
    }

    pub async fn insert_subscription(
        &self,
        subscription: WebhookSubscription,
    ) -> Result<(), LedgerError> {
        self.data
            .write()
            .await
            .subscriptions
            .insert(subscription.id.clone(), subscription);
        self.persist().await
    }

    pub async fn subscription(&self, id: &str) -> Option<WebhookSubscription> {
        self.data.read().await.subscriptions.get(id).cloned()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.data.read().await.payments.values().cloned().collect()
    }
}

#[async_trait]
impl PaymentGateway for MemoryLedger {
    async fn find_by_id(&self, id: &str) -> Result<Option<Payment>, LedgerError> {
        Ok(self.data.read().await.payments.get(id).cloned())
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Payment>, LedgerError> {
        Ok(self
            .data
            .read()
            .await
            .payments
            .values()
            .find(|p| p.checkout_session_id == session_id)
            .cloned())
    }

    async fn find_pending(&self) -> Result<Vec<Payment>, LedgerError> {
        let data = self.data.read().await;
        let mut pending: Vec<Payment> = data
            .payments
            .values()
            .filter(|p| !p.status.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    async fn create(&self, payment: Payment) -> Result<Payment, LedgerError> {
        {
            let mut data = self.data.write().await;

            if data
                .payments
                .values()
                .any(|p| p.checkout_session_id == payment.checkout_session_id)
            {
                return Err(LedgerError::Conflict(format!(
                    "session {} already has a payment",
                    payment.checkout_session_id
                )));
            }
            if data.payments.contains_key(&payment.id) {
                return Err(LedgerError::Conflict(format!("payment {} exists", payment.id)));
            }

            data.payments.insert(payment.id.clone(), payment.clone());
        }

        self.persist().await?;
        Ok(payment)
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: &str, update: PaymentUpdate) -> Result<PaymentUpdated, LedgerError> {
        let updated = {
            let mut data = self.data.write().await;
            let payment = data
                .payments
                .get_mut(id)
                .ok_or_else(|| LedgerError::NotFound(format!("payment {}", id)))?;

            let status_changed = payment.apply(&update);
            PaymentUpdated {
                payment: payment.clone(),
                status_changed,
            }
        };

        self.persist().await?;
        Ok(updated)
    }
}

#[async_trait]
impl SessionGateway for MemoryLedger {
    async fn find_by_id(&self, id: &str) -> Result<Option<CheckoutSession>, LedgerError> {
        Ok(self.data.read().await.sessions.get(id).cloned())
    }

    async fn find_by_invoice_id(
        &self,
        invoice_id: &B256,
    ) -> Result<Option<CheckoutSession>, LedgerError> {
        Ok(self
            .data
            .read()
            .await
            .sessions
            .values()
            .find(|s| &s.invoice_id() == invoice_id)
            .cloned())
    }

    async fn mark_paid(&self, id: &str) -> Result<(), LedgerError> {
        {
            let mut data = self.data.write().await;
            let session = data
                .sessions
                .get_mut(id)
                .ok_or_else(|| LedgerError::NotFound(format!("session {}", id)))?;
            session.status = SessionStatus::Paid;
        }
        self.persist().await
    }
}

#[async_trait]
impl SubscriptionGateway for MemoryLedger {
    async fn find_active(
        &self,
        merchant_id: &str,
        kind: EventKind,
    ) -> Result<Vec<WebhookSubscription>, LedgerError> {
        let data = self.data.read().await;
        let mut subscriptions: Vec<WebhookSubscription> = data
            .subscriptions
            .values()
            .filter(|s| s.merchant_id == merchant_id && s.wants(kind))
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(subscriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn test_payment(id: &str, session_id: &str, status: PaymentStatus) -> Payment {
        let now = Utc::now();
        Payment {
            id: id.into(),
            merchant_id: "merchant-1".into(),
            checkout_session_id: session_id.into(),
            status,
            network: "ethereum".into(),
            address: "0x00000000000000000000000000000000000000aa".into(),
            payer: None,
            tx_hash: Some(format!("0x{:064x}", 1)),
            token_address: None,
            paid_amount: U256::from(1_000u64),
            fee_amount: U256::ZERO,
            confirmations: 0,
            block_number: Some(U256::from(100u64)),
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_session(id: &str) -> CheckoutSession {
        CheckoutSession {
            id: id.into(),
            merchant_id: "merchant-1".into(),
            network: "ethereum".into(),
            receiving_address: "0x00000000000000000000000000000000000000aa".into(),
            token_address: None,
            amount: U256::from(1_000u64),
            status: SessionStatus::Open,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_pending_excludes_terminal() {
        let ledger = MemoryLedger::new();
        ledger
            .create(test_payment("p1", "s1", PaymentStatus::WaitingForConfirmations))
            .await
            .unwrap();
        ledger
            .create(test_payment("p2", "s2", PaymentStatus::Confirmed))
            .await
            .unwrap();
        ledger
            .create(test_payment("p3", "s3", PaymentStatus::Expired))
            .await
            .unwrap();

        let pending = ledger.find_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "p1");
    }

    #[tokio::test]
    async fn test_create_rejects_second_payment_for_session() {
        let ledger = MemoryLedger::new();
        ledger
            .create(test_payment("p1", "s1", PaymentStatus::WaitingForConfirmations))
            .await
            .unwrap();

        let result = ledger
            .create(test_payment("p2", "s1", PaymentStatus::WaitingForConfirmations))
            .await;
        assert!(matches!(result, Err(LedgerError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_missing_payment() {
        let ledger = MemoryLedger::new();
        let result = ledger.update("nope", PaymentUpdate::default()).await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_session_lookup_by_invoice_id() {
        let ledger = MemoryLedger::new();
        ledger.insert_session(test_session("cs_123")).await.unwrap();
        ledger.insert_session(test_session("cs_456")).await.unwrap();

        let found = ledger
            .find_by_invoice_id(&invoice_id_for("cs_456"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "cs_456");

        let missing = ledger
            .find_by_invoice_id(&invoice_id_for("cs_999"))
            .await
            .unwrap();
        assert!(missing.is_none());

        ledger.mark_paid("cs_456").await.unwrap();
        let paid = SessionGateway::find_by_id(&*ledger, "cs_456").await.unwrap().unwrap();
        assert_eq!(paid.status, SessionStatus::Paid);
    }

    #[tokio::test]
    async fn test_find_active_filters_subscriptions() {
        let ledger = MemoryLedger::new();
        let subscription = |id: &str, merchant: &str, events: &[EventKind], active: bool| {
            WebhookSubscription {
                id: id.into(),
                merchant_id: merchant.into(),
                url: format!("https://example.com/{}", id),
                events: events.iter().copied().collect::<BTreeSet<_>>(),
                secret: None,
                is_active: active,
            }
        };

        ledger
            .insert_subscription(subscription("a", "merchant-1", &[EventKind::PaymentCompleted], true))
            .await
            .unwrap();
        ledger
            .insert_subscription(subscription("b", "merchant-1", &[EventKind::PaymentCompleted], false))
            .await
            .unwrap();
        ledger
            .insert_subscription(subscription("c", "merchant-1", &[EventKind::PaymentCreated], true))
            .await
            .unwrap();
        ledger
            .insert_subscription(subscription("d", "merchant-2", &[EventKind::PaymentCompleted], true))
            .await
            .unwrap();

        let active = ledger
            .find_active("merchant-1", EventKind::PaymentCompleted)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger.json");

        {
            let ledger = MemoryLedger::open(path.clone()).await.unwrap();
            ledger.insert_session(test_session("cs_1")).await.unwrap();
            ledger
                .create(test_payment("p1", "cs_1", PaymentStatus::WaitingForConfirmations))
                .await
                .unwrap();
            ledger
                .update(
                    "p1",
                    PaymentUpdate {
                        confirmations: Some(4),
                        ..PaymentUpdate::default()
                    },
                )
                .await
                .unwrap();
        }

        let ledger = MemoryLedger::open(path).await.unwrap();
        let payment = PaymentGateway::find_by_id(&*ledger, "p1").await.unwrap().unwrap();
        assert_eq!(payment.confirmations, 4);
        assert_eq!(payment.block_number, Some(U256::from(100u64)));
        assert!(SessionGateway::find_by_id(&*ledger, "cs_1").await.unwrap().is_some());
    }
}
