//! Ledger engine - the external signer/settlement layer
//!
//! The engine owns keys, signing and the Lightning / on-chain / Liquid protocols.
//! This crate only drives it through a small async surface.
//!
//! # Architecture
//!
//! ```text
//! Workflows ──┐
//!             ├──► EngineClient (connect-once guard)
//! SyncLoop ───┘          │
//!                        ▼
//!                 dyn LedgerEngine
//!                   ├── RpcEngine    (JSON-RPC over WebSocket, feature `rpc`)
//!                   └── MemoryEngine (instant settlement, development)
//! ```
//!
//! # Calls
//!
//! | Call | Idempotent | Description |
//! |------|------------|-------------|
//! | `connect` | - | Once per process, before anything else |
//! | `get_info` | yes | Balance snapshot |
//! | `list_payments` | yes | Payment history |
//! | `prepare_receive` / `receive` | no | Fee quote, then destination |
//! | `prepare_send` / `send` | no | Fee quote, then settlement |
//! | `subscribe` | - | Register an [`EventListener`] |

mod client;
mod memory;
#[cfg(feature = "rpc")]
mod rpc;
mod types;

pub use client::EngineClient;
pub use memory::{MemoryEngine, Operation};
#[cfg(feature = "rpc")]
pub use rpc::{RpcEngine, RpcState};
pub use types::*;

use async_trait::async_trait;

/// Error reported by the engine. The message is shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub code: Option<i64>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
}

/// Receives engine push events. Called on the engine's delivery path, so
/// implementations must return quickly.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: EngineEvent);
}

#[async_trait]
pub trait LedgerEngine: Send + Sync {
    async fn connect(&self, config: &EngineConfig, secret: &str) -> Result<(), EngineError>;
    async fn get_info(&self) -> Result<WalletInfo, EngineError>;
    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>, EngineError>;
    async fn prepare_receive(&self, amount_sat: u64, method: SettlementMethod) -> Result<PrepareReceiveResponse, EngineError>;
    async fn receive(&self, token: &PrepareToken) -> Result<ReceiveResponse, EngineError>;
    async fn prepare_send(&self, destination: &str, amount_sat: u64) -> Result<PrepareSendResponse, EngineError>;
    async fn send(&self, token: &PrepareToken) -> Result<SendResponse, EngineError>;
    fn subscribe(&self, listener: Box<dyn EventListener>) -> Result<(), EngineError>;
}
