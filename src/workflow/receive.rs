//! Receive - amount + settlement method → payable destination.

use super::{parse_amount, with_fallback, Machine, Phase};
use crate::engine::{EngineClient, PrepareToken, SettlementMethod};
use crate::error::{FlowError, FlowResult};
use crate::purchase::PurchaseProviderKind;
use serde::Serialize;

const INVALID_AMOUNT: &str = "Please enter a valid amount";
const PREPARE_FAILED: &str = "Failed to prepare payment";
const RECEIVE_FAILED: &str = "Payment failed. Please try again.";

/// Where incoming funds come from: an engine rail or a purchase provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ReceiveTarget {
    Engine(SettlementMethod),
    External(PurchaseProviderKind),
}

impl ReceiveTarget {
    pub fn parse(value: &str) -> Option<Self> {
        SettlementMethod::from_str(value)
            .map(ReceiveTarget::Engine)
            .or_else(|| PurchaseProviderKind::from_str(value).map(ReceiveTarget::External))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiveTarget::Engine(m) => m.as_str(),
            ReceiveTarget::External(p) => p.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedReceive {
    pub amount_sat: u64,
    pub method: SettlementMethod,
    pub fee_sat: u64,
    #[serde(skip)]
    pub token: PrepareToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizedReceive {
    pub amount_sat: u64,
    pub method: SettlementMethod,
    pub fee_sat: u64,
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReceiveState {
    #[default]
    Idle,
    Preparing { amount_sat: u64, method: SettlementMethod },
    Prepared(PreparedReceive),
    Finalizing(PreparedReceive),
    Finalized(FinalizedReceive),
    Failed { message: String },
}

impl Phase for ReceiveState {
    const WORKFLOW: &'static str = "receive";

    fn label(&self) -> &'static str {
        match self {
            ReceiveState::Idle => "idle",
            ReceiveState::Preparing { .. } => "preparing",
            ReceiveState::Prepared(_) => "prepared",
            ReceiveState::Finalizing(_) => "finalizing",
            ReceiveState::Finalized(_) => "finalized",
            ReceiveState::Failed { .. } => "failed",
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self, ReceiveState::Idle)
    }

    fn is_active(&self) -> bool {
        matches!(self, ReceiveState::Preparing { .. } | ReceiveState::Prepared(_) | ReceiveState::Finalizing(_))
    }

    // nothing has been paid yet, so even an in-flight finalize can be dropped
    fn is_cancellable(&self) -> bool {
        self.is_active()
    }

    fn failed(message: String) -> Self {
        ReceiveState::Failed { message }
    }
}

pub struct ReceiveWorkflow {
    client: EngineClient,
    machine: Machine<ReceiveState>,
}

impl ReceiveWorkflow {
    /// Other receive workflows on the same client compete for one live intent.
    pub fn new(client: EngineClient) -> Self {
        Self { machine: Machine::shared(&client), client }
    }

    pub fn state(&self) -> FlowResult<ReceiveState> {
        self.machine.state()
    }

    /// Ask the engine for a fee quote.
    pub async fn prepare(&self, amount_sat: u64, method: SettlementMethod) -> FlowResult<PreparedReceive> {
        let amount = if amount_sat > 0 { Ok(amount_sat) } else { Err(FlowError::validation(INVALID_AMOUNT)) };
        self.run_prepare(amount, method).await
    }

    /// Same as [`prepare`](Self::prepare) with the amount as typed.
    pub async fn prepare_input(&self, amount: &str, method: SettlementMethod) -> FlowResult<PreparedReceive> {
        self.run_prepare(parse_amount(amount, INVALID_AMOUNT), method).await
    }

    async fn run_prepare(&self, amount: FlowResult<u64>, method: SettlementMethod) -> FlowResult<PreparedReceive> {
        let amount_sat = amount.as_ref().copied().unwrap_or(0);
        let ticket = self.machine.begin(amount.map(|_| ()), ReceiveState::Preparing { amount_sat, method })?;

        let outcome = self
            .client
            .prepare_receive(amount_sat, method)
            .await
            .map(|resp| PreparedReceive { amount_sat, method, fee_sat: resp.fee_sat, token: resp.token })
            .map_err(|e| with_fallback(e, PREPARE_FAILED));
        let prepared = self.machine.settle(ticket, outcome, |p| ReceiveState::Prepared(p.clone()))?;
        tracing::info!(amount_sat, method = method.as_str(), fee_sat = prepared.fee_sat, "receive prepared");
        Ok(prepared)
    }

    /// Spend the prepared token for a payable destination.
    pub async fn finalize(&self) -> FlowResult<FinalizedReceive> {
        let (ticket, prepared) = self.machine.advance("finalize", |s| match s {
            ReceiveState::Prepared(p) => Some((ReceiveState::Finalizing(p.clone()), p.clone())),
            _ => None,
        })?;

        let outcome = self
            .client
            .receive(&prepared.token)
            .await
            .map(|resp| FinalizedReceive {
                amount_sat: prepared.amount_sat,
                method: prepared.method,
                fee_sat: prepared.fee_sat,
                destination: resp.destination,
            })
            .map_err(|e| with_fallback(e, RECEIVE_FAILED));
        let finalized = self.machine.settle(ticket, outcome, |f| ReceiveState::Finalized(f.clone()))?;
        tracing::info!(method = finalized.method.as_str(), "receive destination issued");
        Ok(finalized)
    }

    /// Drop the intent. No engine call is made or undone.
    pub fn cancel(&self) -> FlowResult<()> {
        self.machine.cancel()
    }

    /// Back to `Idle` from anywhere ("Done" after the destination was shown).
    pub fn reset(&self) -> FlowResult<()> {
        self.machine.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, MemoryEngine, Operation};
    use std::sync::Arc;

    async fn workflow(engine: Arc<MemoryEngine>) -> ReceiveWorkflow {
        let client = EngineClient::new(engine);
        client.connect(&EngineConfig::default(), "words").await.unwrap();
        ReceiveWorkflow::new(client)
    }

    #[test]
    fn target_parses_rails_and_providers() {
        assert_eq!(ReceiveTarget::parse("lightning"), Some(ReceiveTarget::Engine(SettlementMethod::Lightning)));
        assert_eq!(ReceiveTarget::parse("Liquid"), Some(ReceiveTarget::Engine(SettlementMethod::OnchainLiquid)));
        assert_eq!(ReceiveTarget::parse("moonpay"), Some(ReceiveTarget::External(PurchaseProviderKind::MoonPay)));
        assert_eq!(ReceiveTarget::parse("paypal"), None);
    }

    #[tokio::test]
    async fn zero_amount_never_reaches_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let wf = workflow(engine.clone()).await;

        let err = wf.prepare(0, SettlementMethod::Lightning).await.unwrap_err();
        assert_eq!(err.to_string(), "Please enter a valid amount");
        assert_eq!(wf.state().unwrap(), ReceiveState::Failed { message: INVALID_AMOUNT.into() });
        assert!(wf.prepare_input("-3", SettlementMethod::Lightning).await.is_err());
        assert_eq!(engine.calls(Operation::PrepareReceive), 0);
    }

    #[tokio::test]
    async fn prepare_then_finalize() {
        let engine = Arc::new(MemoryEngine::new().with_fee(12));
        let wf = workflow(engine).await;

        let prepared = wf.prepare_input("5000", SettlementMethod::OnchainBitcoin).await.unwrap();
        assert_eq!(prepared.fee_sat, 12);
        let done = wf.finalize().await.unwrap();
        assert!(done.destination.starts_with("bc1q"));
        assert_eq!(done.fee_sat, 12);
        assert!(matches!(wf.state().unwrap(), ReceiveState::Finalized(_)));

        wf.reset().unwrap();
        assert_eq!(wf.state().unwrap(), ReceiveState::Idle);
    }

    #[tokio::test]
    async fn finalize_requires_prepared() {
        let wf = workflow(Arc::new(MemoryEngine::new())).await;
        let err = wf.finalize().await.unwrap_err();
        assert_eq!(err.to_string(), "receive: cannot finalize while idle");
    }

    #[tokio::test]
    async fn engine_message_kept_verbatim() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_next(Operation::PrepareReceive, "Amount is below the minimum of 1000 sat");
        let wf = workflow(engine).await;

        let err = wf.prepare(10, SettlementMethod::Lightning).await.unwrap_err();
        assert_eq!(err.to_string(), "Amount is below the minimum of 1000 sat");
        assert_eq!(wf.state().unwrap(), ReceiveState::Failed { message: "Amount is below the minimum of 1000 sat".into() });

        // failed is not active; a fresh attempt is allowed
        assert!(wf.prepare(1000, SettlementMethod::Lightning).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_drops_intent() {
        let engine = Arc::new(MemoryEngine::new());
        let wf = workflow(engine.clone()).await;
        wf.prepare(2000, SettlementMethod::Lightning).await.unwrap();
        wf.cancel().unwrap();
        assert_eq!(wf.state().unwrap(), ReceiveState::Idle);
        assert!(wf.finalize().await.is_err());
        assert_eq!(engine.calls(Operation::Receive), 0);
    }
}
