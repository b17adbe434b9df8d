//! New-block watcher driving confirmation tracking.

use super::WatcherHandle;
use crate::ledger::PaymentGateway;
use crate::types::ConfirmationJob;
use alloy::primitives::U256;
use chain_client::{ChainError, ChainRpc};
use job_queue::JobQueue;
use std::sync::Arc;
use tracing::{debug, error, info};

/// On every new block, enqueues a confirmation job per pending payment.
#[derive(Clone)]
pub struct BlockWatcher {
    payments: Arc<dyn PaymentGateway>,
    queue: JobQueue<ConfirmationJob>,
}

impl BlockWatcher {
    pub fn new(payments: Arc<dyn PaymentGateway>, queue: JobQueue<ConfirmationJob>) -> Self {
        Self { payments, queue }
    }

    pub async fn start(&self, rpc: Arc<dyn ChainRpc>) -> Result<WatcherHandle, ChainError> {
        let (mut receiver, stop) = rpc.subscribe_blocks().await?.into_parts();

        let watcher = self.clone();
        let task = tokio::spawn(async move {
            while let Some(block) = receiver.recv().await {
                match block {
                    Ok(number) => {
                        watcher.on_block(U256::from(number)).await;
                    }
                    Err(e) => error!("Block subscription error: {}", e),
                }
            }
            debug!("Block subscription closed");
        });

        let mut handle = WatcherHandle::new("block watcher");
        handle.push(stop, task);

        info!("Watching new blocks");
        Ok(handle)
    }

    /// Enqueue one confirmation job per pending payment for `block`.
    ///
    /// Failures are logged; the next block is handled normally. Returns the
    /// number of newly enqueued jobs.
    pub async fn on_block(&self, block: U256) -> usize {
        let pending = match self.payments.find_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(%block, "Failed to list pending payments: {}", e);
                return 0;
            }
        };

        if pending.is_empty() {
            return 0;
        }

        let mut enqueued = 0;
        for payment in pending {
            let (Some(tx_hash), Some(tx_block)) = (payment.tx_hash, payment.block_number) else {
                debug!(payment_id = %payment.id, "Payment has no transaction yet");
                continue;
            };

            let job = ConfirmationJob::new(payment.id, block, tx_hash, tx_block);
            let job_id = job.job_id();
            match self.queue.enqueue(Some(job_id.clone()), job).await {
                Ok(outcome) if outcome.is_added() => enqueued += 1,
                Ok(_) => {}
                Err(e) => error!(job_id = %job_id, "Failed to enqueue confirmation job: {}", e),
            }
        }

        debug!(%block, enqueued, "Confirmation jobs enqueued");
        enqueued
    }
}
