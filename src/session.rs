//! Session - the cached wallet snapshot.
//!
//! One [`SessionWriter`] (held by the sync loop) and any number of
//! [`SessionReader`]s. Balance and history always travel together in one
//! `Arc<WalletSnapshot>`, so a reader can never observe half a sync.

use crate::engine::{PaymentRecord, WalletInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletSnapshot {
    pub info: WalletInfo,
    /// Newest first, as the engine returns them.
    pub payments: Vec<PaymentRecord>,
    /// Number of commits so far. Zero until the first sync lands.
    pub revision: u64,
    pub synced_at: Option<DateTime<Utc>>,
}

impl WalletSnapshot {
    pub fn is_synced(&self) -> bool {
        self.revision > 0
    }
}

/// Create an empty session.
pub fn channel() -> (SessionWriter, SessionReader) {
    let (tx, rx) = watch::channel(Arc::new(WalletSnapshot::default()));
    (SessionWriter { tx }, SessionReader { rx })
}

/// Only writer of the session. Deliberately not `Clone`.
pub struct SessionWriter {
    tx: watch::Sender<Arc<WalletSnapshot>>,
}

impl SessionWriter {
    /// Replace the whole snapshot. Returns the new revision.
    pub fn commit(&self, info: WalletInfo, payments: Vec<PaymentRecord>) -> u64 {
        let revision = self.tx.borrow().revision + 1;
        self.tx.send_replace(Arc::new(WalletSnapshot { info, payments, revision, synced_at: Some(Utc::now()) }));
        revision
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader { rx: self.tx.subscribe() }
    }
}

#[derive(Clone)]
pub struct SessionReader {
    rx: watch::Receiver<Arc<WalletSnapshot>>,
}

impl SessionReader {
    pub fn snapshot(&self) -> Arc<WalletSnapshot> {
        self.rx.borrow().clone()
    }

    pub fn info(&self) -> WalletInfo {
        self.rx.borrow().info
    }

    pub fn payments(&self) -> Vec<PaymentRecord> {
        self.rx.borrow().payments.clone()
    }

    pub fn revision(&self) -> u64 {
        self.rx.borrow().revision
    }

    /// Wait for the next commit. `None` once the writer is gone.
    pub async fn changed(&mut self) -> Option<Arc<WalletSnapshot>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the snapshot reaches `revision`. `None` if the writer
    /// goes away first.
    pub async fn wait_for_revision(&mut self, revision: u64) -> Option<Arc<WalletSnapshot>> {
        let snap = self.rx.wait_for(|s| s.revision >= revision).await.ok()?;
        Some(snap.clone())
    }
}
