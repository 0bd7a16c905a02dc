//! EngineClient - connect-once guard in front of a LedgerEngine

use super::*;
use crate::error::{FlowError, FlowResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;

/// Cheap to clone; all clones share one connection state.
#[derive(Clone)]
pub struct EngineClient {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn LedgerEngine>,
    connected: AtomicBool,
    subscribed: AtomicBool,
    connecting: Mutex<()>,
    /// Workflow kind -> owner currently holding an intent on this connection.
    intents: std::sync::Mutex<HashMap<&'static str, u64>>,
    next_owner: AtomicU64,
}

impl EngineClient {
    pub fn new(engine: Arc<dyn LedgerEngine>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                connected: AtomicBool::new(false),
                subscribed: AtomicBool::new(false),
                connecting: Mutex::new(()),
                intents: std::sync::Mutex::new(HashMap::new()),
                next_owner: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Connect exactly once. A failed attempt may be retried; a second
    /// successful one is refused.
    pub async fn connect(&self, config: &EngineConfig, secret: &str) -> FlowResult<()> {
        let _guard = self.inner.connecting.lock().await;
        if self.is_connected() {
            return Err(FlowError::AlreadyConnected);
        }
        self.inner.engine.connect(config, secret).await?;
        self.inner.connected.store(true, Ordering::Release);
        tracing::info!(network = config.network.as_str(), "engine connected");
        Ok(())
    }

    pub async fn get_info(&self) -> FlowResult<WalletInfo> {
        self.ensure_connected()?;
        Ok(self.inner.engine.get_info().await?)
    }

    pub async fn list_payments(&self, filter: &PaymentFilter) -> FlowResult<Vec<PaymentRecord>> {
        self.ensure_connected()?;
        Ok(self.inner.engine.list_payments(filter).await?)
    }

    pub async fn prepare_receive(&self, amount_sat: u64, method: SettlementMethod) -> FlowResult<PrepareReceiveResponse> {
        self.ensure_connected()?;
        Ok(self.inner.engine.prepare_receive(amount_sat, method).await?)
    }

    pub async fn receive(&self, token: &PrepareToken) -> FlowResult<ReceiveResponse> {
        self.ensure_connected()?;
        Ok(self.inner.engine.receive(token).await?)
    }

    pub async fn prepare_send(&self, destination: &str, amount_sat: u64) -> FlowResult<PrepareSendResponse> {
        self.ensure_connected()?;
        Ok(self.inner.engine.prepare_send(destination, amount_sat).await?)
    }

    pub async fn send(&self, token: &PrepareToken) -> FlowResult<SendResponse> {
        self.ensure_connected()?;
        Ok(self.inner.engine.send(token).await?)
    }

    /// Register the single event listener for this process.
    pub fn subscribe(&self, listener: Box<dyn EventListener>) -> FlowResult<()> {
        self.ensure_connected()?;
        if self.inner.subscribed.swap(true, Ordering::AcqRel) {
            return Err(FlowError::InvalidState { workflow: "engine", state: "subscribed", op: "subscribe" });
        }
        if let Err(e) = self.inner.engine.subscribe(listener) {
            self.inner.subscribed.store(false, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) fn next_owner(&self) -> u64 {
        self.inner.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    /// The engine does not isolate concurrent prepare/commit pairs, so each
    /// workflow kind gets one live intent per connection.
    pub(crate) fn claim_intent(&self, workflow: &'static str, owner: u64) -> bool {
        let mut intents = self.inner.intents.lock().unwrap_or_else(PoisonError::into_inner);
        match intents.get(workflow) {
            Some(holder) if *holder != owner => false,
            _ => {
                intents.insert(workflow, owner);
                true
            }
        }
    }

    pub(crate) fn release_intent(&self, workflow: &'static str, owner: u64) {
        let mut intents = self.inner.intents.lock().unwrap_or_else(PoisonError::into_inner);
        if intents.get(workflow) == Some(&owner) {
            intents.remove(workflow);
        }
    }

    fn ensure_connected(&self) -> FlowResult<()> {
        if self.is_connected() { Ok(()) } else { Err(FlowError::NotConnected) }
    }
}
