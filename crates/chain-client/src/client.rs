//! Node RPC surface and its alloy WebSocket implementation.

use crate::error::ChainError;
use crate::subscription::{spawn_feed, Subscription};
use crate::types::{PaymentEventKind, RawLog, TxReceipt};
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, TxHash};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, instrument};

sol! {
    event PaidNative(
        bytes32 indexed invoiceId,
        address indexed payer,
        address indexed merchant,
        uint256 grossAmount,
        uint256 feeAmount
    );

    event PaidToken(
        bytes32 indexed invoiceId,
        address indexed payer,
        address indexed merchant,
        address token,
        uint256 grossAmount,
        uint256 feeAmount
    );
}

/// RPC calls the settlement pipeline makes against a chain node.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Stream batches of settlement logs emitted by `contract` from now on.
    ///
    /// Nodes only push logs mined after the subscription opens; history
    /// comes from [`ChainRpc::get_logs`].
    async fn subscribe_logs(
        &self,
        contract: &str,
        event: PaymentEventKind,
    ) -> Result<Subscription<Vec<RawLog>>, ChainError>;

    /// Settlement logs emitted by `contract` in `from_block..=to_block`.
    async fn get_logs(
        &self,
        contract: &str,
        event: PaymentEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError>;

    /// Height of the latest block.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Stream the height of every new block head.
    async fn subscribe_blocks(&self) -> Result<Subscription<u64>, ChainError>;

    /// Fetch a receipt; `None` while the transaction is not yet mined.
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError>;

    /// Deployed bytecode at `address` (empty for EOAs and undeployed contracts).
    async fn get_code(&self, address: &str) -> Result<Vec<u8>, ChainError>;
}

/// [`ChainRpc`] over an alloy WebSocket provider.
///
/// Reconnection is left to the underlying pubsub transport.
#[derive(Clone)]
pub struct AlloyChainClient {
    provider: DynProvider,
    log_batch_size: usize,
}

impl AlloyChainClient {
    /// Connect to a node over WebSocket.
    pub async fn connect(ws_url: &str, log_batch_size: usize) -> Result<Self, ChainError> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(ws_url))
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .erased();

        info!("Connected to chain node");

        Ok(Self {
            provider,
            log_batch_size: log_batch_size.max(1),
        })
    }

    /// Check node connectivity with `eth_blockNumber`.
    pub async fn health_check(&self) -> bool {
        self.provider.get_block_number().await.is_ok()
    }
}

fn parse_address(address: &str) -> Result<Address, ChainError> {
    Address::from_str(address).map_err(|_| ChainError::InvalidAddress(address.to_string()))
}

fn hex_string(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", alloy::hex::encode(bytes))
}

fn log_filter(contract: &str, event: PaymentEventKind) -> Result<Filter, ChainError> {
    let signature = match event {
        PaymentEventKind::PaidNative => PaidNative::SIGNATURE_HASH,
        PaymentEventKind::PaidToken => PaidToken::SIGNATURE_HASH,
    };
    Ok(Filter::new()
        .address(parse_address(contract)?)
        .event_signature(signature))
}

/// Project a log, forwarding undecodable ones empty so validation reports them.
fn project_or_empty(event: PaymentEventKind, log: &Log) -> RawLog {
    project_log(event, log).unwrap_or_else(|e| {
        debug!("Could not decode {} log: {}", event, e);
        RawLog {
            event_name: event.as_str().to_string(),
            transaction_hash: log.transaction_hash.map(hex_string),
            block_number: log.block_number.map(|n| n.to_string()),
            ..RawLog::default()
        }
    })
}

fn project_log(event: PaymentEventKind, log: &Log) -> Result<RawLog, ChainError> {
    let mut args = BTreeMap::new();

    match event {
        PaymentEventKind::PaidNative => {
            let decoded = log
                .log_decode::<PaidNative>()
                .map_err(|e| ChainError::Decode(e.to_string()))?;
            let data = &decoded.inner.data;
            args.insert("invoiceId".to_string(), hex_string(data.invoiceId));
            args.insert("payer".to_string(), data.payer.to_string());
            args.insert("merchant".to_string(), data.merchant.to_string());
            args.insert("grossAmount".to_string(), data.grossAmount.to_string());
            args.insert("feeAmount".to_string(), data.feeAmount.to_string());
        }
        PaymentEventKind::PaidToken => {
            let decoded = log
                .log_decode::<PaidToken>()
                .map_err(|e| ChainError::Decode(e.to_string()))?;
            let data = &decoded.inner.data;
            args.insert("invoiceId".to_string(), hex_string(data.invoiceId));
            args.insert("payer".to_string(), data.payer.to_string());
            args.insert("merchant".to_string(), data.merchant.to_string());
            args.insert("token".to_string(), data.token.to_string());
            args.insert("grossAmount".to_string(), data.grossAmount.to_string());
            args.insert("feeAmount".to_string(), data.feeAmount.to_string());
        }
    }

    Ok(RawLog {
        event_name: event.as_str().to_string(),
        args,
        transaction_hash: log.transaction_hash.map(hex_string),
        block_number: log.block_number.map(|n| n.to_string()),
    })
}

#[async_trait]
impl ChainRpc for AlloyChainClient {
    #[instrument(skip(self))]
    async fn subscribe_logs(
        &self,
        contract: &str,
        event: PaymentEventKind,
    ) -> Result<Subscription<Vec<RawLog>>, ChainError> {
        let filter = log_filter(contract, event)?;

        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        debug!("Subscribed to {} logs", event);

        let batches = subscription
            .into_stream()
            .ready_chunks(self.log_batch_size)
            .map(move |logs| Ok(logs.iter().map(|log| project_or_empty(event, log)).collect()));

        Ok(spawn_feed(format!("logs:{}", event), 64, batches))
    }

    #[instrument(skip(self))]
    async fn get_logs(
        &self,
        contract: &str,
        event: PaymentEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        let filter = log_filter(contract, event)?
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(logs.iter().map(|log| project_or_empty(event, log)).collect())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn subscribe_blocks(&self) -> Result<Subscription<u64>, ChainError> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let heights = subscription
            .into_stream()
            .map(|header| Ok(header.number));

        Ok(spawn_feed("blocks", 64, heights))
    }

    #[instrument(skip(self))]
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
        let hash = TxHash::from_str(tx_hash)
            .map_err(|_| ChainError::InvalidTxHash(tx_hash.to_string()))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(receipt.map(|r| TxReceipt {
            transaction_hash: hex_string(ReceiptResponse::transaction_hash(&r)),
            block_number: ReceiptResponse::block_number(&r),
            success: ReceiptResponse::status(&r),
        }))
    }

    #[instrument(skip(self))]
    async fn get_code(&self, address: &str) -> Result<Vec<u8>, ChainError> {
        let code = self
            .provider
            .get_code_at(parse_address(address)?)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(code.to_vec())
    }
}
