//! Walletflow: payment workflows and wallet sync over an external ledger engine.
//!
//! The engine (keys, signing, Lightning / on-chain / Liquid) is a black box
//! behind [`LedgerEngine`]. This crate drives it: Send and Receive state
//! machines, a bounded-retry purchase flow, and an event-driven sync loop that
//! keeps a cached wallet snapshot current.
//!
//! # Architecture
//!
//! ```text
//! Node (entry point)
//!   │
//!   ├── EngineClient ──► dyn LedgerEngine (RpcEngine | MemoryEngine)
//!   │
//!   ├── SyncLoop ── Synced events → commit task → SessionWriter
//!   │                                                  │
//!   ├── SessionReader ◄────── Arc<WalletSnapshot> ─────┘
//!   │
//!   ├── SendWorkflow     Idle → Preparing → Prepared → Sending → Succeeded | Failed
//!   ├── ReceiveWorkflow  Idle → Preparing → Prepared → Finalizing → Finalized | Failed
//!   └── PurchaseFlow     prepare_purchase → confirm_purchase (retried) → RedirectHandler
//! ```
//!
//! # Features
//!
//! - `rpc` - JSON-RPC 2.0 engine transport over WebSocket (default)
//! - `recovery` - BIP39 recovery phrase and backup quiz (default)
//!
//! # Usage
//!
//! ```ignore
//! use walletflow::{MemoryEngine, Node, NodeConfig, Network, SettlementMethod};
//!
//! let engine = Arc::new(MemoryEngine::new().with_balance(50_000));
//! let node = Node::start(engine, NodeConfig::new(Network::Regtest).with_mnemonic(words), redirect).await?;
//!
//! let prepared = node.send().prepare("lnbc1...", 1_000).await?;
//! let receipt = node.send().confirm_and_send().await?;
//!
//! node.refresh().await?;
//! println!("{} sat", node.session().info().balance_sat);
//! ```

pub mod engine;
pub mod error;
#[cfg(feature = "recovery")]
pub mod identity;
pub mod logging;
pub mod node;
pub mod purchase;
pub mod runtime;
pub mod session;
pub mod sync;
pub mod workflow;

pub use engine::{
    EngineClient, EngineConfig, EngineError, EngineEvent, EventListener, LedgerEngine, MemoryEngine, Network,
    PaymentDirection, PaymentFilter, PaymentRecord, PaymentStatus, PrepareToken, SettlementMethod, WalletInfo,
};
#[cfg(feature = "rpc")]
pub use engine::RpcEngine;
pub use error::{FlowError, FlowResult};
#[cfg(feature = "recovery")]
pub use identity::{QuizChallenge, RecoveryPhrase};
pub use node::{load_env_file, Node, NodeConfig, ReceiveStart};
pub use purchase::{PurchaseConfig, PurchaseError, PurchaseFlow, PurchaseProvider, PurchaseProviderKind, PurchaseState, RedirectHandler};
pub use runtime::{install_signal_handlers, Shutdown};
pub use session::{SessionReader, WalletSnapshot};
pub use sync::{SyncConfig, SyncError, SyncLoop, SyncStats};
pub use workflow::{ReceiveState, ReceiveTarget, ReceiveWorkflow, SendState, SendWorkflow};
