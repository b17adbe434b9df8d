//! End-to-end pipeline tests over a mock chain and merchant endpoint.

mod common;

use chain_client::PaymentEventKind;
use common::{native_log, session, subscription, tx_hash, MockChain, CONTRACT};
use settlement_pipeline::{
    EventKind, MemoryLedger, PaymentStatus, Pipeline, PipelineConfig, PipelineDeps, PipelineError,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use webhook_client::{WebhookClient, SIGNATURE_HEADER};
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn deps(chain: Arc<MockChain>, ledger: Arc<MemoryLedger>) -> PipelineDeps {
    PipelineDeps {
        rpc: chain,
        payments: ledger.clone(),
        sessions: ledger.clone(),
        subscriptions: ledger,
        webhook_client: WebhookClient::new(Duration::from_secs(5), "settlement-pipeline-test").unwrap(),
    }
}

fn fast_config(network: &str) -> PipelineConfig {
    let mut config = PipelineConfig::new(network, CONTRACT);
    config.queues.backoff_base = Duration::from_millis(10);
    config
}

#[tokio::test]
async fn test_settlement_to_webhook() {
    // 1. Merchant endpoint
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header_exists(SIGNATURE_HEADER))
        .and(body_string_contains("payment.created"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header_exists(SIGNATURE_HEADER))
        .and(body_string_contains("payment.completed"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // 2. Ledger with an open session and a subscription
    let ledger = MemoryLedger::new();
    ledger.insert_session(session("cs_e2e", "hardhat")).await.unwrap();
    ledger
        .insert_subscription(subscription(
            "sub_1",
            &[EventKind::PaymentCreated, EventKind::PaymentCompleted],
            Some("whsec_test"),
            &format!("{}/hooks", server.uri()),
        ))
        .await
        .unwrap();

    // 3. Start the pipeline
    let chain = Arc::new(MockChain::new());
    let temp_dir = TempDir::new().unwrap();
    let mut config = fast_config("hardhat");
    config.queues.storage_dir = Some(temp_dir.path().to_path_buf());
    let handle = Pipeline::start(&config, deps(chain.clone(), ledger.clone()))
        .await
        .unwrap();

    // 4. Settlement event arrives
    let tx = tx_hash(42);
    chain.emit_logs(
        PaymentEventKind::PaidNative,
        vec![native_log("cs_e2e", &tx, 50)],
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        while ledger.payments().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("payment recorded");

    // 5. Next block confirms it
    chain.set_receipt(&tx, 50, true);
    chain.emit_block(51);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let payments = ledger.payments().await;
            if payments.iter().all(|p| p.status == PaymentStatus::Confirmed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("payment confirmed");

    handle.confirmations().wait_idle(Duration::from_millis(10)).await;
    handle.webhooks().wait_idle(Duration::from_millis(10)).await;
    assert_eq!(handle.webhooks().counts().await.completed, 2);

    // 6. Shutdown closes every queue and leaves snapshots behind
    let chain_events = handle.chain_events().clone();
    handle.shutdown().await;
    assert!(chain_events.is_closed());
    for name in ["chain-events", "confirmations", "webhooks"] {
        assert!(temp_dir.path().join(format!("{}.json", name)).exists());
    }
}

#[tokio::test]
async fn test_refuses_to_start_without_contract() {
    let chain = Arc::new(MockChain::with_code(Vec::new()));
    let result = Pipeline::start(&fast_config("ethereum"), deps(chain, MemoryLedger::new())).await;

    assert!(matches!(result, Err(PipelineError::ContractNotDeployed(_))));
}
