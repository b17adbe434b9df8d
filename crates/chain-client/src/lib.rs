//! Chain node client for settlement watching.
//!
//! Exposes the small RPC surface the settlement pipeline needs (log and
//! block subscriptions, log history, receipts, bytecode) behind the
//! [`ChainRpc`] trait, with an alloy WebSocket implementation.
//! Subscriptions are modelled as a receive channel plus an explicit
//! [`StopHandle`].

mod client;
mod error;
mod subscription;
mod types;

pub use client::{AlloyChainClient, ChainRpc, PaidNative, PaidToken};
pub use error::ChainError;
pub use subscription::{spawn_feed, StopHandle, Subscription};
pub use types::*;
