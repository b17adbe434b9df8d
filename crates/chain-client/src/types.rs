//! Node-facing types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settlement events emitted by the payment contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentEventKind {
    PaidNative,
    PaidToken,
}

impl PaymentEventKind {
    pub const ALL: [PaymentEventKind; 2] = [PaymentEventKind::PaidNative, PaymentEventKind::PaidToken];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventKind::PaidNative => "PaidNative",
            PaymentEventKind::PaidToken => "PaidToken",
        }
    }
}

impl std::fmt::Display for PaymentEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contract log as delivered by the node, before validation.
///
/// Every value is carried as text: addresses and hashes as `0x` hex,
/// integers as base-10 strings. Fields the node did not provide are
/// absent rather than defaulted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Event name the log was decoded as.
    pub event_name: String,
    /// Decoded event arguments keyed by their ABI name.
    pub args: BTreeMap<String, String>,
    /// Hash of the transaction that emitted the log.
    pub transaction_hash: Option<String>,
    /// Height of the block that includes the transaction.
    pub block_number: Option<String>,
}

impl RawLog {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }
}

/// Minimal view of a mined transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
    pub success: bool,
}
