//! Sync - keeps the session snapshot in line with the engine
//!
//! ```text
//! engine ──Synced──► SyncListener ──try_send──► [bounded mpsc] ──► commit task
//!                                                                    │
//!                                   try_join!(get_info, list_payments)
//!                                                                    │
//!                                                  SessionWriter::commit
//! ```
//!
//! The listener never does I/O on the engine's delivery path. The commit task
//! drains the channel in order, so commits are never reordered. A failed read
//! commits nothing; the next event tries again.

use crate::engine::{EngineClient, EngineEvent, EventListener, PaymentFilter};
use crate::error::{FlowError, FlowResult};
use crate::session::SessionWriter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

pub const DEFAULT_SYNC_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Capacity of the event channel. Events beyond it are coalesced.
    pub buffer: usize,
    pub filter: PaymentFilter,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { buffer: DEFAULT_SYNC_BUFFER, filter: PaymentFilter::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("wallet sync failed: {0}")]
    Read(#[from] FlowError),
    #[error("sync loop stopped")]
    Stopped,
}

enum Trigger {
    Event,
    Manual(oneshot::Sender<Result<u64, SyncError>>),
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    coalesced: AtomicU64,
    commits: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub events: u64,
    pub coalesced: u64,
    pub commits: u64,
    pub failures: u64,
}

struct SyncListener {
    tx: mpsc::Sender<Trigger>,
    counters: Arc<Counters>,
}

impl EventListener for SyncListener {
    fn on_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Synced => {
                self.counters.events.fetch_add(1, Ordering::Relaxed);
                match self.tx.try_send(Trigger::Event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // a queued sync will read the newer state anyway
                        self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("sync already queued, event coalesced");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => tracing::debug!("sync loop gone, event dropped"),
                }
            }
            other => tracing::debug!(?other, "engine event ignored"),
        }
    }
}

pub struct SyncLoop;

impl SyncLoop {
    /// Register the listener and spawn the commit task. The client must
    /// already be connected.
    pub fn start(
        client: EngineClient,
        writer: SessionWriter,
        config: SyncConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> FlowResult<SyncHandle> {
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        let counters = Arc::new(Counters::default());
        let handle_tx = tx.downgrade();
        client.subscribe(Box::new(SyncListener { tx, counters: counters.clone() }))?;

        let task = tokio::spawn(run(client, writer, config.filter, rx, shutdown, counters.clone()));
        tracing::info!(buffer = config.buffer, "sync loop started");
        Ok(SyncHandle { tx: handle_tx, counters, task })
    }
}

async fn run(
    client: EngineClient,
    writer: SessionWriter,
    filter: PaymentFilter,
    mut rx: mpsc::Receiver<Trigger>,
    mut shutdown: broadcast::Receiver<()>,
    counters: Arc<Counters>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::info!("sync loop shutting down");
                break;
            }
            trigger = rx.recv() => {
                let Some(trigger) = trigger else {
                    tracing::info!("sync listener dropped, loop ends");
                    break;
                };
                let result = sync_once(&client, &writer, &filter).await;
                match &result {
                    Ok(revision) => {
                        counters.commits.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(revision, "wallet snapshot committed");
                    }
                    Err(e) => {
                        counters.failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("{}", e);
                    }
                }
                if let Trigger::Manual(reply) = trigger {
                    let _ = reply.send(result);
                }
            }
        }
    }
}

/// Read info and history concurrently and commit both, or neither.
pub async fn sync_once(client: &EngineClient, writer: &SessionWriter, filter: &PaymentFilter) -> Result<u64, SyncError> {
    let (info, payments) = tokio::try_join!(client.get_info(), client.list_payments(filter))?;
    Ok(writer.commit(info, payments))
}

/// Owner's view of a running sync loop.
pub struct SyncHandle {
    tx: mpsc::WeakSender<Trigger>,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Queue a sync behind any pending events and wait for its outcome.
    pub async fn refresh(&self) -> Result<u64, SyncError> {
        let tx = self.tx.upgrade().ok_or(SyncError::Stopped)?;
        let (reply, done) = oneshot::channel();
        tx.send(Trigger::Manual(reply)).await.map_err(|_| SyncError::Stopped)?;
        drop(tx);
        done.await.map_err(|_| SyncError::Stopped)?
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            events: self.counters.events.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end (after shutdown was triggered).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!("sync task ended abnormally: {}", e);
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, MemoryEngine, Operation};
    use crate::session;

    async fn connected(engine: Arc<MemoryEngine>) -> EngineClient {
        let client = EngineClient::new(engine);
        client.connect(&EngineConfig::default(), "words").await.unwrap();
        client
    }

    #[tokio::test]
    async fn listener_coalesces_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let counters = Arc::new(Counters::default());
        let listener = SyncListener { tx, counters: counters.clone() };
        listener.on_event(EngineEvent::Synced);
        listener.on_event(EngineEvent::Synced);
        listener.on_event(EngineEvent::PaymentPending { details: None });
        assert_eq!(counters.events.load(Ordering::Relaxed), 2);
        assert_eq!(counters.coalesced.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failed_read_commits_nothing() {
        let engine = Arc::new(MemoryEngine::new().with_balance(10));
        let client = connected(engine.clone()).await;
        let (writer, reader) = session::channel();

        engine.fail_next(Operation::ListPayments, "engine busy");
        let err = sync_once(&client, &writer, &PaymentFilter::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "wallet sync failed: engine busy");
        assert_eq!(reader.revision(), 0);

        assert_eq!(sync_once(&client, &writer, &PaymentFilter::default()).await, Ok(1));
        assert_eq!(reader.info().balance_sat, 10);
    }

    #[tokio::test]
    async fn refresh_after_shutdown_reports_stopped() {
        let engine = Arc::new(MemoryEngine::new());
        let client = connected(engine).await;
        let (writer, _reader) = session::channel();
        let (stop, rx) = broadcast::channel(1);
        let handle = SyncLoop::start(client, writer, SyncConfig::default(), rx).unwrap();

        assert_eq!(handle.refresh().await, Ok(1));
        stop.send(()).unwrap();
        tokio::task::yield_now().await;
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.refresh().await, Err(SyncError::Stopped));
    }
}
