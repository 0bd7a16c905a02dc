//! Errors surfaced by workflows and the engine client.

use crate::engine::EngineError;
use crate::purchase::PurchaseError;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// Bad user input, caught before any engine call.
    #[error("{0}")]
    Validation(String),

    /// The engine rejected the call. The message is the engine's, verbatim.
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Purchase(#[from] PurchaseError),

    #[error("engine not connected")]
    NotConnected,

    #[error("engine already connected")]
    AlreadyConnected,

    /// Another intent of the same kind is in flight.
    #[error("{0} already in progress")]
    Busy(&'static str),

    #[error("{workflow}: cannot {op} while {state}")]
    InvalidState {
        workflow: &'static str,
        state: &'static str,
        op: &'static str,
    },

    /// The workflow was cancelled or reset while this call was outstanding.
    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} lock poisoned")]
    Lock(&'static str),

    #[error("config: {0}")]
    Config(String),
}

impl FlowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for errors that never reached the engine.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
