//! Send - destination + amount → submitted payment.
//!
//! `confirm_and_send` is never retried: a second attempt could pay twice.

use super::{parse_amount, with_fallback, Machine, Phase};
use crate::engine::{EngineClient, EngineError, PaymentStatus, PrepareToken};
use crate::error::{FlowError, FlowResult};
use serde::Serialize;

const INVALID_DESTINATION: &str = "Please enter a valid destination address.";
const INVALID_AMOUNT: &str = "Enter a valid amount in whole SATS.";
const PREPARE_FAILED: &str = "Failed to prepare payment.";
const SEND_FAILED: &str = "Payment failed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    LightningInvoice,
    Other,
}

/// Presentation hint only. Validation is the engine's job.
pub fn destination_kind(destination: &str) -> DestinationKind {
    let d = destination.trim();
    if d.len() > 10 && d.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("ln")) {
        DestinationKind::LightningInvoice
    } else {
        DestinationKind::Other
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedSend {
    pub destination: String,
    pub amount_sat: u64,
    /// Exactly what the engine quoted. Never recomputed.
    pub fee_sat: u64,
    #[serde(skip)]
    pub token: PrepareToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub destination: String,
    pub amount_sat: u64,
    pub fee_sat: u64,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SendState {
    #[default]
    Idle,
    Preparing { destination: String, amount_sat: u64 },
    Prepared(PreparedSend),
    Sending(PreparedSend),
    Succeeded(SendReceipt),
    Failed { message: String },
}

impl SendState {
    pub fn outcome(&self) -> Option<SendOutcome> {
        match self {
            SendState::Succeeded(_) => Some(SendOutcome::Success),
            SendState::Failed { .. } => Some(SendOutcome::Failure),
            _ => None,
        }
    }

    pub fn fee_sat(&self) -> Option<u64> {
        match self {
            SendState::Prepared(p) | SendState::Sending(p) => Some(p.fee_sat),
            SendState::Succeeded(r) => Some(r.fee_sat),
            _ => None,
        }
    }
}

impl Phase for SendState {
    const WORKFLOW: &'static str = "send";

    fn label(&self) -> &'static str {
        match self {
            SendState::Idle => "idle",
            SendState::Preparing { .. } => "preparing",
            SendState::Prepared(_) => "prepared",
            SendState::Sending(_) => "sending",
            SendState::Succeeded(_) => "succeeded",
            SendState::Failed { .. } => "failed",
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self, SendState::Idle)
    }

    fn is_active(&self) -> bool {
        matches!(self, SendState::Preparing { .. } | SendState::Prepared(_) | SendState::Sending(_))
    }

    // once `send` is out the payment may settle; its outcome must be kept
    fn is_cancellable(&self) -> bool {
        matches!(self, SendState::Preparing { .. } | SendState::Prepared(_))
    }

    fn failed(message: String) -> Self {
        SendState::Failed { message }
    }
}

pub struct SendWorkflow {
    client: EngineClient,
    machine: Machine<SendState>,
}

impl SendWorkflow {
    /// Other send workflows on the same client compete for one live intent.
    pub fn new(client: EngineClient) -> Self {
        Self { machine: Machine::shared(&client), client }
    }

    pub fn state(&self) -> FlowResult<SendState> {
        self.machine.state()
    }

    pub async fn prepare(&self, destination: &str, amount_sat: u64) -> FlowResult<PreparedSend> {
        let amount = if amount_sat > 0 { Ok(amount_sat) } else { Err(FlowError::validation(INVALID_AMOUNT)) };
        self.run_prepare(destination, amount).await
    }

    /// Amount as typed; must be whole sats.
    pub async fn prepare_input(&self, destination: &str, amount: &str) -> FlowResult<PreparedSend> {
        self.run_prepare(destination, parse_amount(amount, INVALID_AMOUNT)).await
    }

    async fn run_prepare(&self, destination: &str, amount: FlowResult<u64>) -> FlowResult<PreparedSend> {
        let destination = destination.trim().to_string();
        let amount_sat = amount.as_ref().copied().unwrap_or(0);
        let check = if destination.is_empty() { Err(FlowError::validation(INVALID_DESTINATION)) } else { amount.map(|_| ()) };
        let ticket = self.machine.begin(check, SendState::Preparing { destination: destination.clone(), amount_sat })?;

        let outcome = self
            .client
            .prepare_send(&destination, amount_sat)
            .await
            .map(|resp| PreparedSend { destination: destination.clone(), amount_sat, fee_sat: resp.fee_sat, token: resp.token })
            .map_err(|e| with_fallback(e, PREPARE_FAILED));
        let prepared = self.machine.settle(ticket, outcome, |p| SendState::Prepared(p.clone()))?;
        tracing::info!(amount_sat, fee_sat = prepared.fee_sat, "send prepared");
        Ok(prepared)
    }

    /// Submit the prepared payment. Any error is final.
    pub async fn confirm_and_send(&self) -> FlowResult<SendReceipt> {
        let (ticket, prepared) = self.machine.advance("confirm", |s| match s {
            SendState::Prepared(p) => Some((SendState::Sending(p.clone()), p.clone())),
            _ => None,
        })?;

        let outcome = match self.client.send(&prepared.token).await {
            Ok(resp) if resp.status == PaymentStatus::Failed => Err(FlowError::Engine(EngineError::new(SEND_FAILED))),
            Ok(resp) => Ok(SendReceipt {
                destination: prepared.destination,
                amount_sat: prepared.amount_sat,
                fee_sat: prepared.fee_sat,
                status: resp.status,
            }),
            Err(e) => Err(with_fallback(e, SEND_FAILED)),
        };
        match self.machine.settle(ticket, outcome, |r| SendState::Succeeded(r.clone())) {
            Ok(receipt) => {
                tracing::info!(amount_sat = receipt.amount_sat, status = receipt.status.as_str(), "payment sent");
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!("payment failed: {}", e);
                Err(e)
            }
        }
    }

    /// The "Cancel" button of the confirm step.
    pub fn cancel(&self) -> FlowResult<()> {
        self.machine.cancel()
    }

    pub fn reset(&self) -> FlowResult<()> {
        self.machine.reset()
    }
}
