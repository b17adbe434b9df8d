//! Composition root wiring watchers, queues and processors together.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ledger::{PaymentGateway, SessionGateway, SubscriptionGateway};
use crate::notify::WebhookNotifier;
use crate::processors::{ChainEventProcessor, ConfirmationProcessor, WebhookDeliveryProcessor};
use crate::types::{ChainEventJob, ConfirmationJob, WebhookJob};
use crate::watchers::{BlockWatcher, ChainEventWatcher, WatcherHandle};
use chain_client::ChainRpc;
use job_queue::JobQueue;
use std::sync::Arc;
use tracing::{error, info};
use webhook_client::WebhookClient;

pub const CHAIN_EVENT_QUEUE: &str = "chain-events";
pub const CONFIRMATION_QUEUE: &str = "confirmations";
pub const WEBHOOK_QUEUE: &str = "webhooks";

/// External collaborators the pipeline is built from.
#[derive(Clone)]
pub struct PipelineDeps {
    pub rpc: Arc<dyn ChainRpc>,
    pub payments: Arc<dyn PaymentGateway>,
    pub sessions: Arc<dyn SessionGateway>,
    pub subscriptions: Arc<dyn SubscriptionGateway>,
    pub webhook_client: WebhookClient,
}

/// Entry point for the settlement pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Verify the contract, open the queues, start their workers, then
    /// start watching the chain.
    pub async fn start(config: &PipelineConfig, deps: PipelineDeps) -> Result<PipelineHandle, PipelineError> {
        let code = deps.rpc.get_code(&config.contract_address).await?;
        if code.is_empty() {
            return Err(PipelineError::ContractNotDeployed(config.contract_address.clone()));
        }
        info!(
            contract = %config.contract_address,
            network = %config.network,
            "Settlement contract found ({} bytes)",
            code.len()
        );

        let queues = &config.queues;
        let chain_events: JobQueue<ChainEventJob> =
            JobQueue::open(queues.options(CHAIN_EVENT_QUEUE)).await?;
        let confirmations: JobQueue<ConfirmationJob> =
            JobQueue::open(queues.options(CONFIRMATION_QUEUE)).await?;
        let webhooks: JobQueue<WebhookJob> = JobQueue::open(queues.options(WEBHOOK_QUEUE)).await?;

        let notifier = WebhookNotifier::new(
            deps.subscriptions.clone(),
            deps.sessions.clone(),
            webhooks.clone(),
        );

        webhooks
            .start(
                Arc::new(WebhookDeliveryProcessor::new(deps.webhook_client.clone())),
                queues.concurrency,
            )
            .await;
        confirmations
            .start(
                Arc::new(ConfirmationProcessor::new(
                    deps.rpc.clone(),
                    deps.payments.clone(),
                    notifier.clone(),
                )),
                queues.concurrency,
            )
            .await;
        chain_events
            .start(
                Arc::new(ChainEventProcessor::new(
                    config.network.clone(),
                    deps.sessions.clone(),
                    deps.payments.clone(),
                    notifier,
                )),
                queues.concurrency,
            )
            .await;

        let mut handle = PipelineHandle {
            watchers: Vec::new(),
            chain_events,
            confirmations,
            webhooks,
        };

        let event_watcher = ChainEventWatcher::new(config.contract_address.clone(), handle.chain_events.clone());
        match event_watcher.start(deps.rpc.clone(), config.start_block).await {
            Ok(watcher) => handle.watchers.push(watcher),
            Err(e) => {
                handle.shutdown().await;
                return Err(e.into());
            }
        }

        let block_watcher = BlockWatcher::new(deps.payments.clone(), handle.confirmations.clone());
        match block_watcher.start(deps.rpc.clone()).await {
            Ok(watcher) => handle.watchers.push(watcher),
            Err(e) => {
                handle.shutdown().await;
                return Err(e.into());
            }
        }

        info!("Settlement pipeline started");
        Ok(handle)
    }
}

/// Running pipeline.
pub struct PipelineHandle {
    watchers: Vec<WatcherHandle>,
    chain_events: JobQueue<ChainEventJob>,
    confirmations: JobQueue<ConfirmationJob>,
    webhooks: JobQueue<WebhookJob>,
}

impl PipelineHandle {
    pub fn chain_events(&self) -> &JobQueue<ChainEventJob> {
        &self.chain_events
    }

    pub fn confirmations(&self) -> &JobQueue<ConfirmationJob> {
        &self.confirmations
    }

    pub fn webhooks(&self) -> &JobQueue<WebhookJob> {
        &self.webhooks
    }

    /// Stop the watchers, then drain and close the queues upstream first.
    pub async fn shutdown(self) {
        info!("Shutting down settlement pipeline");

        for watcher in self.watchers {
            watcher.stop().await;
        }

        // Upstream processors enqueue webhooks, so close that queue last.
        if let Err(e) = self.chain_events.close().await {
            error!("Failed to close {} queue: {}", CHAIN_EVENT_QUEUE, e);
        }
        if let Err(e) = self.confirmations.close().await {
            error!("Failed to close {} queue: {}", CONFIRMATION_QUEUE, e);
        }
        if let Err(e) = self.webhooks.close().await {
            error!("Failed to close {} queue: {}", WEBHOOK_QUEUE, e);
        }

        info!("Settlement pipeline stopped");
    }
}
