//! Node - one connected wallet: engine client, session, sync loop and the
//! payment workflows wired together.
//!
//! ```text
//! Node::start(engine, config, redirect)
//!   1. EngineClient::connect(engine_config, mnemonic)   (once)
//!   2. SyncLoop::start → subscribe + commit task
//!   3. Send / Receive workflows, PurchaseFlow
//! ```

pub mod config;

pub use config::{load_env_file, NodeConfig};

use crate::engine::{EngineClient, LedgerEngine};
use crate::error::{FlowError, FlowResult};
use crate::purchase::{PurchaseFlow, PurchaseProvider, RedirectHandler};
use crate::runtime::Shutdown;
use crate::session::{self, SessionReader};
use crate::sync::{SyncError, SyncHandle, SyncLoop, SyncStats};
use crate::workflow::{PreparedReceive, ReceiveTarget, ReceiveWorkflow, SendWorkflow};
use serde::Serialize;
use std::sync::Arc;

/// First step of a receive, by target kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiveStart {
    /// Fee quote from the engine; call `receive().finalize()` next.
    Prepared(PreparedReceive),
    /// Provider checkout, already handed to the redirect handler.
    Checkout { url: String },
}

pub struct Node {
    client: EngineClient,
    session: SessionReader,
    sync: SyncHandle,
    send: SendWorkflow,
    receive: ReceiveWorkflow,
    purchase: PurchaseFlow,
    shutdown: Shutdown,
    config: NodeConfig,
}

impl Node {
    pub async fn start<E>(engine: Arc<E>, config: NodeConfig, redirect: Arc<dyn RedirectHandler>) -> FlowResult<Self>
    where
        E: LedgerEngine + PurchaseProvider + 'static,
    {
        Self::start_with_shutdown(engine, config, redirect, Shutdown::new()).await
    }

    /// Same as [`start`](Self::start), stopping the sync loop on an external
    /// shutdown (e.g. from `install_signal_handlers`).
    pub async fn start_with_shutdown<E>(
        engine: Arc<E>,
        config: NodeConfig,
        redirect: Arc<dyn RedirectHandler>,
        shutdown: Shutdown,
    ) -> FlowResult<Self>
    where
        E: LedgerEngine + PurchaseProvider + 'static,
    {
        let secret = config
            .mnemonic
            .clone()
            .ok_or_else(|| FlowError::Config("a wallet mnemonic is required to connect".into()))?;

        let client = EngineClient::new(engine.clone());
        client.connect(&config.engine_config(), &secret).await?;

        let (writer, reader) = session::channel();
        let sync = SyncLoop::start(client.clone(), writer, config.sync_config(), shutdown.subscribe())?;
        let purchase = PurchaseFlow::new(engine, redirect, config.purchase.clone());

        tracing::info!(network = config.network.as_str(), "node started");
        Ok(Self {
            send: SendWorkflow::new(client.clone()),
            receive: ReceiveWorkflow::new(client.clone()),
            client,
            session: reader,
            sync,
            purchase,
            shutdown,
            config,
        })
    }

    pub fn client(&self) -> &EngineClient { &self.client }
    pub fn config(&self) -> &NodeConfig { &self.config }
    pub fn session(&self) -> SessionReader { self.session.clone() }
    pub fn send(&self) -> &SendWorkflow { &self.send }
    pub fn receive(&self) -> &ReceiveWorkflow { &self.receive }
    pub fn purchase(&self) -> &PurchaseFlow { &self.purchase }
    pub fn sync_stats(&self) -> SyncStats { self.sync.stats() }

    /// Sync now instead of waiting for the engine's next event.
    pub async fn refresh(&self) -> Result<u64, SyncError> {
        self.sync.refresh().await
    }

    /// Route a receive to the engine or to the purchase provider.
    pub async fn begin_receive(&self, amount_sat: u64, target: ReceiveTarget) -> FlowResult<ReceiveStart> {
        match target {
            ReceiveTarget::Engine(method) => Ok(ReceiveStart::Prepared(self.receive.prepare(amount_sat, method).await?)),
            ReceiveTarget::External(_) => Ok(ReceiveStart::Checkout { url: self.purchase.purchase_sat(amount_sat).await? }),
        }
    }

    /// Stop the sync loop and wait for it.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        self.sync.join().await;
        tracing::info!("node stopped");
    }
}
