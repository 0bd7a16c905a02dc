//! Sync Tests: event-driven snapshot refresh
//!
//! These tests verify:
//! 1. A Synced event leads to exactly one whole-snapshot commit
//! 2. A failed read commits nothing and the next trigger recovers
//! 3. Events beyond the channel capacity are coalesced
//! 4. Readers never see balance and history from different syncs
//! 5. Shutdown stops the commit task

use std::sync::Arc;
use std::time::Duration;
use walletflow::engine::{EngineClient, EngineConfig, EngineEvent, MemoryEngine, Operation};
use walletflow::runtime::Shutdown;
use walletflow::session::{self, SessionReader};
use walletflow::sync::{SyncConfig, SyncError, SyncHandle, SyncLoop};
use walletflow::FlowError;

async fn start(engine: Arc<MemoryEngine>, buffer: usize) -> (SyncHandle, SessionReader, Shutdown) {
    let client = EngineClient::new(engine);
    client.connect(&EngineConfig::default(), "test words").await.expect("connect");
    let (writer, reader) = session::channel();
    let shutdown = Shutdown::new();
    let config = SyncConfig { buffer, ..Default::default() };
    let handle = SyncLoop::start(client, writer, config, shutdown.subscribe()).expect("sync loop");
    (handle, reader, shutdown)
}

#[tokio::test]
async fn synced_event_commits_snapshot() {
    let engine = Arc::new(MemoryEngine::new());
    let (handle, mut reader, _shutdown) = start(engine.clone(), 16).await;

    engine.settle_incoming(2_500, Some("refund"));
    let snap = tokio::time::timeout(Duration::from_secs(5), reader.wait_for_revision(1))
        .await
        .expect("commit in time")
        .expect("writer alive");

    assert_eq!(snap.info.balance_sat, 2_500);
    assert_eq!(snap.payments.len(), 1);
    assert_eq!(snap.payments[0].description.as_deref(), Some("refund"));
    assert!(snap.synced_at.is_some());
    assert_eq!(handle.stats().commits, 1);
}

#[tokio::test]
async fn failed_read_keeps_previous_snapshot() {
    let engine = Arc::new(MemoryEngine::new());
    let (handle, reader, _shutdown) = start(engine.clone(), 16).await;

    engine.settle_incoming(100, None);
    assert_eq!(handle.refresh().await, Ok(2));
    assert_eq!(reader.info().balance_sat, 100);

    // the event's sync hits the failure; the refresh queued behind it recovers
    engine.fail_next(Operation::GetInfo, "engine unavailable");
    engine.settle_incoming(50, None);
    assert_eq!(handle.refresh().await, Ok(3));

    let snap = reader.snapshot();
    assert_eq!(snap.info.balance_sat, 150);
    assert_eq!(snap.payments.len(), 2);
    let stats = handle.stats();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.commits, 3);
}

#[tokio::test]
async fn refresh_surfaces_read_error() {
    let engine = Arc::new(MemoryEngine::new().with_balance(7));
    let (handle, reader, _shutdown) = start(engine.clone(), 16).await;

    engine.fail_next(Operation::ListPayments, "timeout");
    let err = handle.refresh().await.unwrap_err();
    assert_eq!(err, SyncError::Read(FlowError::Engine(walletflow::EngineError::new("timeout"))));
    assert_eq!(reader.revision(), 0);
}

#[tokio::test]
async fn bursts_are_coalesced() {
    let engine = Arc::new(MemoryEngine::new());
    let (handle, reader, _shutdown) = start(engine.clone(), 1).await;

    // the commit task has not run yet; only one slot is free
    for _ in 0..5 {
        engine.emit(EngineEvent::Synced);
    }
    assert_eq!(handle.refresh().await, Ok(2));

    let stats = handle.stats();
    assert_eq!(stats.events, 5);
    assert_eq!(stats.coalesced, 4);
    assert_eq!(stats.commits, 2);
    assert_eq!(reader.revision(), 2);
}

#[tokio::test]
async fn other_events_do_not_sync() {
    let engine = Arc::new(MemoryEngine::new());
    let (handle, reader, _shutdown) = start(engine.clone(), 16).await;

    engine.emit(EngineEvent::PaymentPending { details: None });
    engine.emit(EngineEvent::Other);
    tokio::task::yield_now().await;

    assert_eq!(handle.stats().events, 0);
    assert_eq!(reader.revision(), 0);
}

#[tokio::test]
async fn snapshots_are_never_mixed() {
    let engine = Arc::new(MemoryEngine::new());
    let (handle, reader, _shutdown) = start(engine.clone(), 4).await;

    let mut watcher = reader.clone();
    let observer = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(snap) = watcher.changed().await {
            let history: u64 = snap.payments.iter().map(|p| p.amount_sat).sum();
            assert_eq!(snap.info.balance_sat, history, "revision {}", snap.revision);
            seen += 1;
            if snap.payments.len() == 20 {
                break;
            }
        }
        seen
    });

    for n in 1..=20 {
        engine.settle_incoming(n * 10, None);
        tokio::task::yield_now().await;
    }
    handle.refresh().await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), observer).await.expect("observer").unwrap();
    assert!(seen >= 1);
    assert_eq!(reader.payments().len(), 20);
}

#[tokio::test]
async fn shutdown_stops_loop() {
    let engine = Arc::new(MemoryEngine::new());
    let (handle, reader, shutdown) = start(engine.clone(), 16).await;

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle.join()).await.expect("loop ends");

    // events after shutdown go nowhere
    engine.settle_incoming(10, None);
    tokio::task::yield_now().await;
    assert_eq!(reader.revision(), 0);
}

#[tokio::test]
async fn requires_connected_client() {
    let client = EngineClient::new(Arc::new(MemoryEngine::new()));
    let (writer, _reader) = session::channel();
    let result = SyncLoop::start(client, writer, SyncConfig::default(), Shutdown::new().subscribe());
    assert!(matches!(result, Err(FlowError::NotConnected)));
}
