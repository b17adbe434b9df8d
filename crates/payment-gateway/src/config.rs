//! Application configuration loaded from environment variables.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use settlement_pipeline::{PipelineConfig, QueueConfig, WebhookConfig};
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Chain node and settlement contract
    pub chain: ChainConfig,

    /// Job queue settings
    #[serde(default)]
    pub queues: QueueConfig,

    /// Outbound webhook settings
    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Node WebSocket endpoint. Often embeds a provider API key.
    pub ws_url: SecretString,

    /// Settlement contract address
    pub contract_address: String,

    /// Network name, selects the confirmation depth
    #[serde(default = "default_network")]
    pub network: String,

    /// First block to watch for settlement events
    #[serde(default)]
    pub start_block: u64,

    /// Maximum logs handed to the validator at once
    #[serde(default = "default_log_batch_size")]
    pub log_batch_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    /// Snapshot file for the in-memory ledger; memory-only when unset
    pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_network() -> String {
    "ethereum".into()
}

fn default_log_batch_size() -> usize {
    64
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    // Addresses and URLs must stay strings.
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Settings for the settlement pipeline.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            network: self.chain.network.clone(),
            contract_address: self.chain.contract_address.clone(),
            start_block: self.chain.start_block,
            queues: self.queues.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    fn build(overrides: &[(&str, &str)]) -> Result<Config> {
        let mut builder = config::Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        Ok(builder.build()?.try_deserialize()?)
    }

    #[test]
    fn test_minimal_config() {
        let config = build(&[
            ("chain.ws_url", "wss://node.example/v3/secret-key"),
            ("chain.contract_address", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
        ])
        .unwrap();

        assert_eq!(config.chain.network, "ethereum");
        assert_eq!(config.chain.start_block, 0);
        assert_eq!(config.chain.log_batch_size, 64);
        assert_eq!(config.queues.attempts, 3);
        assert_eq!(config.webhook.timeout, Duration::from_secs(10));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.ledger.storage_path.is_none());
        assert_eq!(
            config.chain.ws_url.expose_secret(),
            "wss://node.example/v3/secret-key"
        );
    }

    #[test]
    fn test_string_values_are_coerced() {
        let config = build(&[
            ("chain.ws_url", "ws://127.0.0.1:8545"),
            ("chain.contract_address", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("chain.network", "hardhat"),
            ("chain.start_block", "1200"),
            ("queues.concurrency", "4"),
            ("queues.backoff_base", "250ms"),
            ("queues.storage_dir", "/var/lib/payment-gateway/queues"),
            ("log_format", "json"),
        ])
        .unwrap();

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.network, "hardhat");
        assert_eq!(pipeline.start_block, 1200);
        assert_eq!(pipeline.queues.concurrency, 4);
        assert_eq!(pipeline.queues.backoff_base, Duration::from_millis(250));
        assert_eq!(
            pipeline.queues.storage_dir,
            Some(PathBuf::from("/var/lib/payment-gateway/queues"))
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_requires_chain_settings() {
        assert!(build(&[("chain.ws_url", "ws://127.0.0.1:8545")]).is_err());
    }

    #[test]
    fn test_debug_redacts_ws_url() {
        let config = build(&[
            ("chain.ws_url", "wss://node.example/v3/secret-key"),
            ("chain.contract_address", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
        ])
        .unwrap();

        assert!(!format!("{:?}", config).contains("secret-key"));
    }
}
