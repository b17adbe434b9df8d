//! Settlement event watcher.

use super::WatcherHandle;
use crate::error::ValidationError;
use crate::types::{parse_decimal, ChainEvent, ChainEventJob};
use alloy::primitives::{Address, B256};
use chain_client::{ChainRpc, PaymentEventKind, RawLog};
use job_queue::JobQueue;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Blocks per `eth_getLogs` request while backfilling.
const BACKFILL_SPAN: u64 = 2_000;

fn is_hex(value: &str, digits: usize) -> bool {
    value.len() == digits + 2
        && value.starts_with("0x")
        && value[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

fn require<'a>(log: &'a RawLog, field: &'static str) -> Result<&'a str, ValidationError> {
    log.arg(field).ok_or(ValidationError::MissingField(field))
}

fn address(field: &'static str, value: &str) -> Result<Address, ValidationError> {
    let invalid = || ValidationError::InvalidAddress {
        field,
        value: value.to_string(),
    };
    if !is_hex(value, 40) {
        return Err(invalid());
    }
    Address::from_str(value).map_err(|_| invalid())
}

fn hash(field: &'static str, value: &str) -> Result<B256, ValidationError> {
    let invalid = || ValidationError::InvalidHash {
        field,
        value: value.to_string(),
    };
    if !is_hex(value, 64) {
        return Err(invalid());
    }
    B256::from_str(value).map_err(|_| invalid())
}

fn number(field: &'static str, value: &str) -> Result<alloy::primitives::U256, ValidationError> {
    parse_decimal(value).ok_or_else(|| ValidationError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Check a raw log against the settlement event schema.
///
/// Addresses must be `0x` plus 40 hex digits, hashes `0x` plus 64, and
/// amounts and block numbers base-10 integers.
pub fn validate_log(log: &RawLog) -> Result<ChainEventJob, ValidationError> {
    let event_name = match log.event_name.as_str() {
        "PaidNative" => PaymentEventKind::PaidNative,
        "PaidToken" => PaymentEventKind::PaidToken,
        other => return Err(ValidationError::UnknownEvent(other.to_string())),
    };

    let token_address = match event_name {
        PaymentEventKind::PaidNative => None,
        PaymentEventKind::PaidToken => Some(address("token", require(log, "token")?)?),
    };

    let transaction_hash = log
        .transaction_hash
        .as_deref()
        .ok_or(ValidationError::MissingField("transactionHash"))?;
    let block_number = log
        .block_number
        .as_deref()
        .ok_or(ValidationError::MissingField("blockNumber"))?;

    let event = ChainEvent {
        invoice_id: hash("invoiceId", require(log, "invoiceId")?)?,
        payer: address("payer", require(log, "payer")?)?,
        merchant_address: address("merchant", require(log, "merchant")?)?,
        gross_amount: number("grossAmount", require(log, "grossAmount")?)?,
        fee_amount: number("feeAmount", require(log, "feeAmount")?)?,
        transaction_hash: hash("transactionHash", transaction_hash)?,
        block_number: number("blockNumber", block_number)?,
        token_address,
    };

    Ok(ChainEventJob { event_name, event })
}

/// Watches the settlement contract and forwards validated events to the
/// chain-event queue.
#[derive(Clone)]
pub struct ChainEventWatcher {
    contract_address: String,
    queue: JobQueue<ChainEventJob>,
}

impl ChainEventWatcher {
    pub fn new(contract_address: impl Into<String>, queue: JobQueue<ChainEventJob>) -> Self {
        Self {
            contract_address: contract_address.into(),
            queue,
        }
    }

    /// Watch every settlement event kind from `from_block` on.
    ///
    /// Live subscriptions open first, then logs already mined between
    /// `from_block` and the current head are fetched and forwarded. Logs
    /// seen by both paths collapse on their job id.
    ///
    /// Node errors on an open subscription are logged and watching
    /// continues; reconnection belongs to the transport.
    pub async fn start(
        &self,
        rpc: Arc<dyn ChainRpc>,
        from_block: u64,
    ) -> Result<WatcherHandle, chain_client::ChainError> {
        let mut handle = WatcherHandle::new("chain event watcher");

        for kind in PaymentEventKind::ALL {
            let subscription = rpc.subscribe_logs(&self.contract_address, kind).await?;
            let (mut receiver, stop) = subscription.into_parts();

            let watcher = self.clone();
            let task = tokio::spawn(async move {
                while let Some(batch) = receiver.recv().await {
                    match batch {
                        Ok(logs) => {
                            watcher.forward_batch(logs).await;
                        }
                        Err(e) => {
                            error!(event = %kind, "Settlement log subscription error: {}", e);
                        }
                    }
                }
                debug!(event = %kind, "Settlement log subscription closed");
            });

            handle.push(stop, task);
        }

        let head = rpc.block_number().await?;
        let backfilled = self.backfill(rpc.as_ref(), from_block, head).await?;

        info!(
            contract = %self.contract_address,
            from_block,
            head,
            backfilled,
            "Watching settlement events"
        );
        Ok(handle)
    }

    /// Forward settlement logs mined in `from_block..=to_block`.
    /// Returns the number of events forwarded.
    pub async fn backfill(
        &self,
        rpc: &dyn ChainRpc,
        from_block: u64,
        to_block: u64,
    ) -> Result<usize, chain_client::ChainError> {
        let mut forwarded = 0;
        let mut start = from_block;

        while start <= to_block {
            let end = start.saturating_add(BACKFILL_SPAN - 1).min(to_block);
            for kind in PaymentEventKind::ALL {
                let logs = rpc
                    .get_logs(&self.contract_address, kind, start, end)
                    .await?;
                if !logs.is_empty() {
                    debug!(event = %kind, start, end, "Backfilling {} settlement logs", logs.len());
                    forwarded += self.forward_batch(logs).await;
                }
            }
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }

        Ok(forwarded)
    }

    /// Validate a batch and enqueue the valid events. Malformed logs are
    /// dropped individually. Returns the number of events forwarded.
    pub async fn forward_batch(&self, logs: Vec<RawLog>) -> usize {
        let mut forwarded = 0;

        for log in &logs {
            let job = match validate_log(log) {
                Ok(job) => job,
                Err(e) => {
                    warn!(
                        tx_hash = log.transaction_hash.as_deref().unwrap_or("unknown"),
                        "Dropping malformed settlement log: {}",
                        e
                    );
                    continue;
                }
            };

            let job_id = job.job_id();
            match self.queue.enqueue(Some(job_id.clone()), job).await {
                Ok(_) => forwarded += 1,
                Err(e) => error!(job_id = %job_id, "Failed to enqueue chain event: {}", e),
            }
        }

        debug!("Forwarded {}/{} settlement logs", forwarded, logs.len());
        forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use std::collections::BTreeMap;

    fn native_log() -> RawLog {
        let mut args = BTreeMap::new();
        args.insert("invoiceId".to_string(), format!("0x{}", "ab".repeat(32)));
        args.insert("payer".to_string(), format!("0x{}", "11".repeat(20)));
        args.insert("merchant".to_string(), format!("0x{}", "22".repeat(20)));
        args.insert("grossAmount".to_string(), "1000000000000000000".to_string());
        args.insert("feeAmount".to_string(), "10000000000000000".to_string());

        RawLog {
            event_name: "PaidNative".to_string(),
            args,
            transaction_hash: Some(format!("0x{}", "cd".repeat(32))),
            block_number: Some("100".to_string()),
        }
    }

    #[test]
    fn test_validate_native() {
        let job = validate_log(&native_log()).unwrap();
        assert_eq!(job.event_name, PaymentEventKind::PaidNative);
        assert_eq!(job.event.block_number, U256::from(100u64));
        assert_eq!(
            job.event.gross_amount,
            U256::from(1_000_000_000_000_000_000u128)
        );
        assert!(job.event.token_address.is_none());
    }

    #[test]
    fn test_validate_token_requires_token() {
        let mut log = native_log();
        log.event_name = "PaidToken".to_string();
        assert_eq!(
            validate_log(&log),
            Err(ValidationError::MissingField("token"))
        );

        log.args
            .insert("token".to_string(), format!("0x{}", "33".repeat(20)));
        let job = validate_log(&log).unwrap();
        assert_eq!(job.event_name, PaymentEventKind::PaidToken);
        assert!(job.event.token_address.is_some());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let mut log = native_log();
        log.args.insert("payer".to_string(), "0x1234".to_string());
        assert!(matches!(
            validate_log(&log),
            Err(ValidationError::InvalidAddress { field: "payer", .. })
        ));

        let mut log = native_log();
        log.args
            .insert("merchant".to_string(), format!("0x{}", "zz".repeat(20)));
        assert!(matches!(
            validate_log(&log),
            Err(ValidationError::InvalidAddress { field: "merchant", .. })
        ));

        let mut log = native_log();
        log.transaction_hash = Some("cd".repeat(32));
        assert!(matches!(
            validate_log(&log),
            Err(ValidationError::InvalidHash { field: "transactionHash", .. })
        ));

        let mut log = native_log();
        log.args.insert("feeAmount".to_string(), "-5".to_string());
        assert!(matches!(
            validate_log(&log),
            Err(ValidationError::InvalidNumber { field: "feeAmount", .. })
        ));

        let mut log = native_log();
        log.block_number = Some("0x64".to_string());
        assert!(matches!(
            validate_log(&log),
            Err(ValidationError::InvalidNumber { field: "blockNumber", .. })
        ));
    }

    #[test]
    fn test_rejects_missing_and_unknown() {
        let mut log = native_log();
        log.args.remove("invoiceId");
        assert_eq!(
            validate_log(&log),
            Err(ValidationError::MissingField("invoiceId"))
        );

        let mut log = native_log();
        log.block_number = None;
        assert_eq!(
            validate_log(&log),
            Err(ValidationError::MissingField("blockNumber"))
        );

        let mut log = native_log();
        log.event_name = "Refunded".to_string();
        assert_eq!(
            validate_log(&log),
            Err(ValidationError::UnknownEvent("Refunded".to_string()))
        );
    }

    #[test]
    fn test_amounts_beyond_u128() {
        let mut log = native_log();
        let huge = U256::MAX.to_string();
        log.args.insert("grossAmount".to_string(), huge.clone());
        let job = validate_log(&log).unwrap();
        assert_eq!(job.event.gross_amount, U256::MAX);
        assert_eq!(job.event.gross_amount.to_string(), huge);
    }
}
