//! Node Tests: the wired-up wallet against the in-memory engine
//!
//! These tests verify:
//! 1. Node connects once and refuses to start without a secret
//! 2. Sends and incoming payments show up in the session snapshot
//! 3. Receive routing between engine rails and the purchase provider
//! 4. Clean shutdown

use std::sync::{Arc, Mutex};
use std::time::Duration;
use walletflow::engine::{MemoryEngine, Operation};
use walletflow::{
    FlowError, Network, Node, NodeConfig, PaymentDirection, ReceiveStart, ReceiveState, ReceiveTarget, RedirectHandler,
    SettlementMethod,
};

const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

impl RedirectHandler for Collect {
    fn hand_off(&self, url: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

fn config() -> NodeConfig {
    NodeConfig::new(Network::Regtest).with_mnemonic(TEST_MNEMONIC).with_api_key("test-key")
}

async fn node(engine: Arc<MemoryEngine>) -> Node {
    Node::start(engine, config(), Arc::new(Collect::default())).await.expect("node")
}

#[tokio::test]
async fn refuses_to_start_without_mnemonic() {
    let engine = Arc::new(MemoryEngine::new());
    let result = Node::start(engine.clone(), NodeConfig::new(Network::Regtest), Arc::new(Collect::default())).await;
    assert!(matches!(result, Err(FlowError::Config(_))));
    assert_eq!(engine.calls(Operation::Connect), 0);
}

#[tokio::test]
async fn connect_error_is_surfaced() {
    let engine = Arc::new(MemoryEngine::new());
    engine.fail_next(Operation::Connect, "invalid api key");
    let err = Node::start(engine, config(), Arc::new(Collect::default())).await.err().expect("error");
    assert_eq!(err.to_string(), "invalid api key");
}

#[tokio::test]
async fn connects_once_and_syncs() {
    let engine = Arc::new(MemoryEngine::new().with_balance(42_000));
    let node = node(engine.clone()).await;

    assert!(node.client().is_connected());
    assert_eq!(engine.calls(Operation::Connect), 1);
    assert_eq!(node.config().engine_config().network, Network::Regtest);

    assert_eq!(node.refresh().await, Ok(1));
    assert_eq!(node.session().info().balance_sat, 42_000);
    node.shutdown().await;
}

#[tokio::test]
async fn send_shows_up_in_history() {
    let engine = Arc::new(MemoryEngine::new().with_balance(10_000).with_fee(21));
    let node = node(engine).await;
    let mut session = node.session();

    node.send().prepare("lnbc1qexampleinvoice", 1_500).await.unwrap();
    let receipt = node.send().confirm_and_send().await.unwrap();
    assert_eq!(receipt.fee_sat, 21);

    // the engine announces the send; the loop commits without a manual refresh
    let snap = tokio::time::timeout(Duration::from_secs(5), session.wait_for_revision(1))
        .await
        .expect("sync in time")
        .expect("session open");
    assert_eq!(snap.info.balance_sat, 10_000 - 1_521);
    assert_eq!(snap.payments[0].direction, PaymentDirection::Outbound);
    assert_eq!(snap.payments[0].to_string(), "-1500 SAT  lnbc1qexampleinvoice  COMPLETE");
    node.shutdown().await;
}

#[tokio::test]
async fn incoming_payment_updates_session() {
    let engine = Arc::new(MemoryEngine::new());
    let node = node(engine.clone()).await;
    let mut session = node.session();

    engine.settle_incoming(7_000, Some("invoice paid"));
    let snap = tokio::time::timeout(Duration::from_secs(5), session.changed())
        .await
        .expect("sync in time")
        .expect("session open");
    assert_eq!(snap.info.balance_sat, 7_000);
    assert_eq!(node.sync_stats().commits, 1);
    node.shutdown().await;
}

#[tokio::test]
async fn receive_on_engine_rail() {
    let engine = Arc::new(MemoryEngine::new().with_fee(3));
    let node = node(engine).await;

    let start = node.begin_receive(20_000, ReceiveTarget::Engine(SettlementMethod::Lightning)).await.unwrap();
    let ReceiveStart::Prepared(prepared) = start else { panic!("expected engine quote") };
    assert_eq!(prepared.fee_sat, 3);

    let done = node.receive().finalize().await.unwrap();
    assert!(done.destination.starts_with("lnbc20000"));
    assert!(matches!(node.receive().state().unwrap(), ReceiveState::Finalized(_)));
    node.shutdown().await;
}

#[tokio::test]
async fn receive_via_provider_hands_off_checkout() {
    let engine = Arc::new(MemoryEngine::new());
    let redirect = Arc::new(Collect::default());
    let node = Node::start(engine.clone(), config(), redirect.clone()).await.unwrap();

    let target = ReceiveTarget::parse("moonpay").unwrap();
    let start = node.begin_receive(50_000, target).await.unwrap();
    let ReceiveStart::Checkout { url } = start else { panic!("expected checkout") };

    assert!(url.starts_with("https://buy.memory/moonpay?amount_sat=50000"));
    assert_eq!(*redirect.0.lock().unwrap(), vec![url]);
    assert_eq!(engine.calls(Operation::PrepareReceive), 0);
    node.shutdown().await;
}

#[tokio::test]
async fn workflows_share_one_connection() {
    let engine = Arc::new(MemoryEngine::new().with_balance(5_000));
    let node = node(engine.clone()).await;

    node.receive().prepare(1_000, SettlementMethod::OnchainBitcoin).await.unwrap();
    node.send().prepare("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", 1_000).await.unwrap();
    assert_eq!(engine.calls(Operation::Connect), 1);

    // the client refuses a second connect
    let again = node.client().connect(&node.config().engine_config(), TEST_MNEMONIC).await;
    assert_eq!(again, Err(FlowError::AlreadyConnected));
    node.shutdown().await;
}
