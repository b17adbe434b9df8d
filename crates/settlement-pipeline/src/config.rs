//! Pipeline configuration.

use job_queue::{Backoff, QueueOptions};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use webhook_client::{WebhookClient, WebhookError};

/// Settlement pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Network the watched contract lives on; selects the confirmation depth.
    #[serde(default = "default_network")]
    pub network: String,

    /// Settlement contract address.
    pub contract_address: String,

    /// Block to start watching settlement events from.
    #[serde(default)]
    pub start_block: u64,

    #[serde(default)]
    pub queues: QueueConfig,
}

fn default_network() -> String {
    "ethereum".to_string()
}

impl PipelineConfig {
    pub fn new(network: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            contract_address: contract_address.into(),
            start_block: 0,
            queues: QueueConfig::default(),
        }
    }
}

/// Settings shared by the chain-event, confirmation and webhook queues.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Directory for queue snapshots. Queues are memory-only when unset.
    pub storage_dir: Option<PathBuf>,

    /// Workers per queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Total attempts per job, including the first.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// First retry delay; doubles on every further retry.
    #[serde(default = "default_backoff_base", with = "humantime_serde")]
    pub backoff_base: Duration,

    #[serde(default = "default_retention")]
    pub completed_retention: usize,

    /// Failed jobs kept for inspection.
    #[serde(default = "default_retention")]
    pub failed_retention: usize,
}

fn default_concurrency() -> usize {
    1
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(2)
}

fn default_retention() -> usize {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            concurrency: default_concurrency(),
            attempts: default_attempts(),
            backoff_base: default_backoff_base(),
            completed_retention: default_retention(),
            failed_retention: default_retention(),
        }
    }
}

impl QueueConfig {
    /// Options for the queue called `name`, snapshotted to `{storage_dir}/{name}.json`.
    pub fn options(&self, name: &str) -> QueueOptions {
        let mut options = QueueOptions::new(name)
            .with_attempts(self.attempts)
            .with_backoff(Backoff::Exponential(self.backoff_base))
            .with_retention(self.completed_retention, self.failed_retention);

        if let Some(dir) = &self.storage_dir {
            options = options.with_storage_path(dir.join(format!("{}.json", name)));
        }

        options
    }
}

/// Outbound webhook HTTP settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_webhook_timeout() -> Duration {
    webhook_client::DEFAULT_TIMEOUT
}

fn default_user_agent() -> String {
    format!("settlement-pipeline/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: default_webhook_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl WebhookConfig {
    pub fn build_client(&self) -> Result<WebhookClient, WebhookError> {
        WebhookClient::new(self.timeout, &self.user_agent)
    }
}
