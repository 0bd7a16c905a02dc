//! Workflows - Send and Receive payment state machines
//!
//! Both follow the same shape: validate, prepare (fee quote + token), then a
//! second engine call that spends the token. At most one intent of each kind
//! is live per engine connection, however many workflows share it, and any
//! engine response that arrives after `cancel`/`reset` is dropped on the floor.
//!
//! ```text
//! Receive: Idle → Preparing → Prepared → Finalizing → Finalized
//! Send:    Idle → Preparing → Prepared → Sending    → Succeeded
//!                     └────────────┴──────────┴─────→ Failed
//! ```

mod receive;
mod send;

pub use receive::{FinalizedReceive, PreparedReceive, ReceiveState, ReceiveTarget, ReceiveWorkflow};
pub use send::{destination_kind, DestinationKind, PreparedSend, SendOutcome, SendReceipt, SendState, SendWorkflow};

use crate::engine::{EngineClient, EngineError};
use crate::error::{FlowError, FlowResult};
use std::sync::Mutex;

/// Parse a user-typed amount in whole sats. Zero, negatives, fractions and
/// junk are all rejected with `message`.
pub fn parse_amount(input: &str, message: &str) -> FlowResult<u64> {
    match input.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(FlowError::validation(message)),
    }
}

/// Engine failures with an empty message get the workflow's fallback text.
fn with_fallback(err: FlowError, fallback: &str) -> FlowError {
    match err {
        FlowError::Engine(e) if e.message.trim().is_empty() => FlowError::Engine(EngineError { message: fallback.to_string(), ..e }),
        other => other,
    }
}

pub(crate) trait Phase: Clone + Default {
    const WORKFLOW: &'static str;

    fn label(&self) -> &'static str;
    fn is_idle(&self) -> bool;
    /// An intent is held or an engine call is outstanding.
    fn is_active(&self) -> bool;
    fn is_cancellable(&self) -> bool;
    fn failed(message: String) -> Self;
}

/// Proof that a transition was started under a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket(u64);

struct Slot<S> {
    state: S,
    generation: u64,
}

/// This machine's claim on its kind's intent slot in the shared client.
struct Lease {
    client: EngineClient,
    workflow: &'static str,
    owner: u64,
}

impl Lease {
    fn claim(&self) -> bool {
        self.client.claim_intent(self.workflow, self.owner)
    }

    fn release(&self) {
        self.client.release_intent(self.workflow, self.owner);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

pub(crate) struct Machine<S> {
    slot: Mutex<Slot<S>>,
    lease: Option<Lease>,
}

impl<S: Phase> Machine<S> {
    pub fn new() -> Self {
        Self { slot: Mutex::new(Slot { state: S::default(), generation: 0 }), lease: None }
    }

    /// A machine that competes with every other machine of the same kind on
    /// `client` for the single live intent.
    pub fn shared(client: &EngineClient) -> Self {
        let lease = Lease { client: client.clone(), workflow: S::WORKFLOW, owner: client.next_owner() };
        Self { lease: Some(lease), ..Self::new() }
    }

    /// Give the intent back once nothing is held or in flight.
    fn release_unless_active(&self, state: &S) {
        if !state.is_active() {
            if let Some(lease) = &self.lease {
                lease.release();
            }
        }
    }

    fn lock(&self) -> FlowResult<std::sync::MutexGuard<'_, Slot<S>>> {
        self.slot.lock().map_err(|_| FlowError::Lock(S::WORKFLOW))
    }

    pub fn state(&self) -> FlowResult<S> {
        Ok(self.lock()?.state.clone())
    }

    /// Start a new intent. Busy if this machine, or another of the same kind
    /// on the connection, holds one; a failed `check` lands in `Failed`
    /// without touching the engine.
    pub fn begin(&self, check: FlowResult<()>, next: S) -> FlowResult<Ticket> {
        let mut slot = self.lock()?;
        if slot.state.is_active() {
            return Err(FlowError::Busy(S::WORKFLOW));
        }
        slot.generation += 1;
        if let Err(e) = check {
            slot.state = S::failed(e.to_string());
            return Err(e);
        }
        if !self.lease.as_ref().map_or(true, Lease::claim) {
            return Err(FlowError::Busy(S::WORKFLOW));
        }
        slot.state = next;
        Ok(Ticket(slot.generation))
    }

    /// Move on from the current state if `step` allows it.
    pub fn advance<T>(&self, op: &'static str, step: impl FnOnce(&S) -> Option<(S, T)>) -> FlowResult<(Ticket, T)> {
        let mut slot = self.lock()?;
        let Some((next, carried)) = step(&slot.state) else {
            return Err(FlowError::InvalidState { workflow: S::WORKFLOW, state: slot.state.label(), op });
        };
        slot.state = next;
        self.release_unless_active(&slot.state);
        Ok((Ticket(slot.generation), carried))
    }

    /// Record the outcome of an engine call started under `ticket`.
    pub fn settle<T>(&self, ticket: Ticket, outcome: FlowResult<T>, on_ok: impl FnOnce(&T) -> S) -> FlowResult<T> {
        let mut slot = self.lock()?;
        if slot.generation != ticket.0 {
            tracing::debug!(workflow = S::WORKFLOW, "stale engine response discarded");
            return Err(FlowError::Cancelled);
        }
        let result = match outcome {
            Ok(value) => {
                slot.state = on_ok(&value);
                Ok(value)
            }
            Err(e) => {
                slot.state = S::failed(e.to_string());
                Err(e)
            }
        };
        self.release_unless_active(&slot.state);
        result
    }

    pub fn cancel(&self) -> FlowResult<()> {
        let mut slot = self.lock()?;
        if slot.state.is_idle() {
            return Ok(());
        }
        if !slot.state.is_cancellable() {
            return Err(FlowError::InvalidState { workflow: S::WORKFLOW, state: slot.state.label(), op: "cancel" });
        }
        slot.generation += 1;
        slot.state = S::default();
        self.release_unless_active(&slot.state);
        Ok(())
    }

    pub fn reset(&self) -> FlowResult<()> {
        let mut slot = self.lock()?;
        slot.generation += 1;
        slot.state = S::default();
        self.release_unless_active(&slot.state);
        Ok(())
    }
}
