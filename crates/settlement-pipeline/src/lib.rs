//! On-chain settlement confirmation and merchant notification.
//!
//! Watches the payment contract for settlement events, reconciles them to
//! checkout sessions, tracks confirmation depth block by block until a
//! payment is final, and delivers signed webhooks to merchant endpoints.
//!
//! ```text
//! ChainEventWatcher -> [chain-events]  -> ChainEventProcessor   -> ledger
//! BlockWatcher      -> [confirmations] -> ConfirmationProcessor -> ledger
//!          both processors -> [webhooks] -> WebhookDeliveryProcessor -> merchant
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod pipeline;
pub mod policy;
pub mod processors;
pub mod types;
pub mod watchers;

pub use config::{PipelineConfig, QueueConfig, WebhookConfig};
pub use error::{LedgerError, PipelineError, ValidationError};
pub use ledger::{MemoryLedger, PaymentGateway, PaymentUpdated, SessionGateway, SubscriptionGateway};
pub use notify::WebhookNotifier;
pub use pipeline::{Pipeline, PipelineDeps, PipelineHandle};
pub use policy::min_confirmations;
pub use processors::{ChainEventProcessor, ConfirmationOutcome, ConfirmationProcessor, WebhookDeliveryProcessor};
pub use types::*;
pub use watchers::{validate_log, BlockWatcher, ChainEventWatcher, WatcherHandle};
