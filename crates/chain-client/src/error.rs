//! Chain client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid transaction hash: {0}")]
    InvalidTxHash(String),

    #[error("Log decode failed: {0}")]
    Decode(String),

    #[error("Subscription closed")]
    SubscriptionClosed,
}

