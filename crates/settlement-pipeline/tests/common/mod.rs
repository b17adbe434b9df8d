//! Common test utilities for integration tests.

#![allow(dead_code)]

use alloy::primitives::U256;
use async_trait::async_trait;
use chain_client::{spawn_feed, ChainError, ChainRpc, PaymentEventKind, RawLog, Subscription, TxReceipt};
use job_queue::{Backoff, JobQueue, QueueOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use settlement_pipeline::{
    invoice_id_for, CheckoutSession, EventKind, SessionStatus, WebhookSubscription,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const MERCHANT_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const PAYER_ADDRESS: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";
pub const TOKEN_ADDRESS: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

type Sender<T> = mpsc::UnboundedSender<Result<T, ChainError>>;

fn feed<T: Send + 'static>(name: &str) -> (Sender<T>, Subscription<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let source = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, spawn_feed(name, 16, source))
}

/// Scriptable chain node.
pub struct MockChain {
    code: Vec<u8>,
    receipts: Mutex<HashMap<String, TxReceipt>>,
    receipt_failures: AtomicU32,
    logs: Mutex<HashMap<PaymentEventKind, Sender<Vec<RawLog>>>>,
    blocks: Mutex<Option<Sender<u64>>>,
    history: Mutex<Vec<RawLog>>,
    log_queries: Mutex<Vec<(PaymentEventKind, u64, u64)>>,
    head: AtomicU64,
}

impl MockChain {
    pub fn new() -> Self {
        Self::with_code(vec![0x60, 0x80, 0x60, 0x40])
    }

    pub fn with_code(code: Vec<u8>) -> Self {
        Self {
            code,
            receipts: Mutex::new(HashMap::new()),
            receipt_failures: AtomicU32::new(0),
            logs: Mutex::new(HashMap::new()),
            blocks: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            log_queries: Mutex::new(Vec::new()),
            head: AtomicU64::new(0),
        }
    }

    /// Record logs mined before any subscription, raising the head to cover them.
    pub fn mine_logs(&self, logs: Vec<RawLog>) {
        for log in &logs {
            let block = log_block(log);
            self.head.fetch_max(block, Ordering::SeqCst);
        }
        self.history.lock().unwrap().extend(logs);
    }

    pub fn set_head(&self, number: u64) {
        self.head.store(number, Ordering::SeqCst);
    }

    /// `(event, from, to)` of every history query, in order.
    pub fn log_queries(&self) -> Vec<(PaymentEventKind, u64, u64)> {
        self.log_queries.lock().unwrap().clone()
    }

    pub fn set_receipt(&self, tx_hash: &str, block: u64, success: bool) {
        self.receipts.lock().unwrap().insert(
            tx_hash.to_lowercase(),
            TxReceipt {
                transaction_hash: tx_hash.to_lowercase(),
                block_number: Some(block),
                success,
            },
        );
    }

    /// Make the next `n` receipt lookups fail with a transport error.
    pub fn fail_receipts(&self, n: u32) {
        self.receipt_failures.store(n, Ordering::SeqCst);
    }

    pub fn emit_logs(&self, kind: PaymentEventKind, logs: Vec<RawLog>) {
        let logs_by_kind = self.logs.lock().unwrap();
        let sender = logs_by_kind.get(&kind).expect("no log subscription");
        sender.send(Ok(logs)).unwrap();
    }

    pub fn emit_log_error(&self, kind: PaymentEventKind) {
        let logs_by_kind = self.logs.lock().unwrap();
        let sender = logs_by_kind.get(&kind).expect("no log subscription");
        sender
            .send(Err(ChainError::Transport("connection reset".into())))
            .unwrap();
    }

    pub fn emit_block(&self, number: u64) {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .as_ref()
            .expect("no block subscription")
            .send(Ok(number))
            .unwrap();
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn subscribe_logs(
        &self,
        _contract: &str,
        event: PaymentEventKind,
    ) -> Result<Subscription<Vec<RawLog>>, ChainError> {
        let (tx, subscription) = feed(event.as_str());
        self.logs.lock().unwrap().insert(event, tx);
        Ok(subscription)
    }

    async fn get_logs(
        &self,
        _contract: &str,
        event: PaymentEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        self.log_queries
            .lock()
            .unwrap()
            .push((event, from_block, to_block));
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.event_name == event.as_str())
            .filter(|log| (from_block..=to_block).contains(&log_block(log)))
            .cloned()
            .collect())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn subscribe_blocks(&self) -> Result<Subscription<u64>, ChainError> {
        let (tx, subscription) = feed("blocks");
        *self.blocks.lock().unwrap() = Some(tx);
        Ok(subscription)
    }

    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
        let remaining = self.receipt_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.receipt_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ChainError::Transport("request timed out".into()));
        }
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .get(&tx_hash.to_lowercase())
            .cloned())
    }

    async fn get_code(&self, _address: &str) -> Result<Vec<u8>, ChainError> {
        Ok(self.code.clone())
    }
}

fn log_block(log: &RawLog) -> u64 {
    log.block_number
        .as_deref()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Deterministic transaction hash.
pub fn tx_hash(n: u8) -> String {
    format!("0x{}", format!("{:02x}", n).repeat(32))
}

pub fn session(id: &str, network: &str) -> CheckoutSession {
    CheckoutSession {
        id: id.into(),
        merchant_id: "merchant-1".into(),
        network: network.into(),
        receiving_address: MERCHANT_ADDRESS.into(),
        token_address: None,
        amount: U256::from(1_000_000_000_000_000_000u128),
        status: SessionStatus::Open,
        expires_at: None,
    }
}

pub fn subscription(id: &str, events: &[EventKind], secret: Option<&str>, url: &str) -> WebhookSubscription {
    WebhookSubscription {
        id: id.into(),
        merchant_id: "merchant-1".into(),
        url: url.into(),
        events: events.iter().copied().collect(),
        secret: secret.map(str::to_string),
        is_active: true,
    }
}

/// A `PaidNative` log settling `session_id` in full.
pub fn native_log(session_id: &str, tx: &str, block: u64) -> RawLog {
    let mut log = RawLog {
        event_name: "PaidNative".into(),
        transaction_hash: Some(tx.into()),
        block_number: Some(block.to_string()),
        ..RawLog::default()
    };
    let args = [
        ("invoiceId", format!("0x{}", alloy::hex::encode(invoice_id_for(session_id)))),
        ("payer", PAYER_ADDRESS.to_string()),
        ("merchant", MERCHANT_ADDRESS.to_string()),
        ("grossAmount", "1000000000000000000".to_string()),
        ("feeAmount", "10000000000000000".to_string()),
    ];
    for (name, value) in args {
        log.args.insert(name.to_string(), value);
    }
    log
}

pub fn token_log(session_id: &str, tx: &str, block: u64) -> RawLog {
    let mut log = native_log(session_id, tx, block);
    log.event_name = "PaidToken".into();
    log.args.insert("token".into(), TOKEN_ADDRESS.into());
    log
}

/// In-memory queue retrying quickly.
pub async fn fast_queue<T>(name: &str) -> JobQueue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    JobQueue::open(
        QueueOptions::new(name)
            .with_attempts(3)
            .with_backoff(Backoff::Exponential(Duration::from_millis(10))),
    )
    .await
    .unwrap()
}
