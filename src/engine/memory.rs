//! MemoryEngine - in-process engine with instant settlement.
//!
//! No keys and no network. Sends settle immediately, receives hand out fake
//! destinations, and failures can be scripted per operation. Swap this for an
//! `RpcEngine` against a real engine daemon.

use super::*;
use crate::purchase::{PurchaseProvider, PurchaseProviderKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    GetInfo,
    ListPayments,
    PrepareReceive,
    Receive,
    PrepareSend,
    Send,
    PreparePurchase,
    ConfirmPurchase,
}

#[derive(Debug, Clone)]
enum Pending {
    Receive { amount_sat: u64, method: SettlementMethod },
    Send { destination: String, amount_sat: u64, fee_sat: u64 },
    Purchase { provider: PurchaseProviderKind, amount_sat: u64 },
}

#[derive(Default)]
struct MemoryState {
    info: WalletInfo,
    payments: Vec<PaymentRecord>,
    fee_sat: u64,
    counter: u64,
    pending: HashMap<String, Pending>,
    failures: HashMap<Operation, VecDeque<EngineError>>,
    calls: HashMap<Operation, usize>,
    purchase_results: VecDeque<Option<String>>,
}

pub struct MemoryEngine {
    state: Mutex<MemoryState>,
    listeners: RwLock<Vec<Box<dyn EventListener>>>,
}

impl Default for MemoryEngine {
    fn default() -> Self { Self::new() }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self { state: Mutex::new(MemoryState::default()), listeners: RwLock::new(Vec::new()) }
    }

    pub fn with_fee(self, fee_sat: u64) -> Self { self.lock().fee_sat = fee_sat; self }
    pub fn with_balance(self, balance_sat: u64) -> Self { self.lock().info.balance_sat = balance_sat; self }

    /// Make the next call of `op` fail with `message`. Queued failures are consumed in order.
    pub fn fail_next(&self, op: Operation, message: impl Into<String>) {
        self.lock().failures.entry(op).or_default().push_back(EngineError::new(message));
    }

    /// Queue the raw result of the next `confirm_purchase`; `None` means "no URL".
    pub fn push_purchase_result(&self, url: Option<String>) {
        self.lock().purchase_results.push_back(url);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn payments(&self) -> Vec<PaymentRecord> {
        self.lock().payments.clone()
    }

    /// Credit an incoming payment and announce a sync.
    pub fn settle_incoming(&self, amount_sat: u64, description: Option<&str>) {
        {
            let mut s = self.lock();
            s.counter += 1;
            let id = format!("memory-in-{}", s.counter);
            s.info.balance_sat = s.info.balance_sat.saturating_add(amount_sat);
            s.payments.insert(0, record(id, amount_sat, PaymentDirection::Inbound, description.map(str::to_string)));
        }
        self.emit(EngineEvent::Synced);
    }

    /// Deliver an event to every listener, synchronously.
    pub fn emit(&self, event: EngineEvent) {
        let listeners = self.listeners.read().unwrap_or_else(|p| p.into_inner());
        for l in listeners.iter() {
            l.on_event(event.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Count the call and pop a scripted failure, if any.
    fn enter(&self, op: Operation) -> Result<std::sync::MutexGuard<'_, MemoryState>, EngineError> {
        let mut s = self.lock();
        *s.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = s.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        Ok(s)
    }

    fn next_token(s: &mut MemoryState, prefix: &str) -> PrepareToken {
        s.counter += 1;
        PrepareToken::new(format!("{}-{}", prefix, s.counter))
    }
}

fn record(id: String, amount_sat: u64, direction: PaymentDirection, description: Option<String>) -> PaymentRecord {
    PaymentRecord {
        id: Some(id),
        amount_sat,
        direction,
        status: PaymentStatus::Complete,
        description,
        timestamp: Some(chrono::Utc::now().timestamp().max(0) as u64),
    }
}

#[async_trait]
impl LedgerEngine for MemoryEngine {
    async fn connect(&self, _config: &EngineConfig, secret: &str) -> Result<(), EngineError> {
        self.enter(Operation::Connect)?;
        if secret.trim().is_empty() {
            return Err(EngineError::new("missing wallet secret"));
        }
        Ok(())
    }

    async fn get_info(&self) -> Result<WalletInfo, EngineError> {
        Ok(self.enter(Operation::GetInfo)?.info)
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>, EngineError> {
        let s = self.enter(Operation::ListPayments)?;
        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(s.payments.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn prepare_receive(&self, amount_sat: u64, method: SettlementMethod) -> Result<PrepareReceiveResponse, EngineError> {
        let mut s = self.enter(Operation::PrepareReceive)?;
        let token = Self::next_token(&mut s, "receive");
        s.pending.insert(token.as_str().to_string(), Pending::Receive { amount_sat, method });
        Ok(PrepareReceiveResponse { fee_sat: s.fee_sat, token })
    }

    async fn receive(&self, token: &PrepareToken) -> Result<ReceiveResponse, EngineError> {
        let mut s = self.enter(Operation::Receive)?;
        let Some(Pending::Receive { amount_sat, method }) = s.pending.remove(token.as_str()) else {
            return Err(EngineError::new("unknown prepare token"));
        };
        s.counter += 1;
        let destination = match method {
            SettlementMethod::Lightning => format!("lnbc{}memory{}", amount_sat, s.counter),
            SettlementMethod::OnchainBitcoin => format!("bc1qmemory{}", s.counter),
            SettlementMethod::OnchainLiquid => format!("lq1qmemory{}", s.counter),
        };
        Ok(ReceiveResponse { destination })
    }

    async fn prepare_send(&self, destination: &str, amount_sat: u64) -> Result<PrepareSendResponse, EngineError> {
        let mut s = self.enter(Operation::PrepareSend)?;
        let fee_sat = s.fee_sat;
        let total = total_debit(amount_sat, fee_sat)?;
        if total > s.info.balance_sat {
            return Err(EngineError::new(format!("insufficient funds: have {}, need {}", s.info.balance_sat, total)));
        }
        let token = Self::next_token(&mut s, "send");
        s.pending.insert(token.as_str().to_string(), Pending::Send { destination: destination.to_string(), amount_sat, fee_sat });
        Ok(PrepareSendResponse { fee_sat, token })
    }

    async fn send(&self, token: &PrepareToken) -> Result<SendResponse, EngineError> {
        {
            let mut s = self.enter(Operation::Send)?;
            let Some(Pending::Send { destination, amount_sat, fee_sat }) = s.pending.remove(token.as_str()) else {
                return Err(EngineError::new("unknown prepare token"));
            };
            let total = total_debit(amount_sat, fee_sat)?;
            if total > s.info.balance_sat {
                return Err(EngineError::new("insufficient funds"));
            }
            s.info.balance_sat -= total;
            s.counter += 1;
            let id = format!("memory-out-{}", s.counter);
            s.payments.insert(0, record(id, amount_sat, PaymentDirection::Outbound, Some(destination)));
        }
        self.emit(EngineEvent::Synced);
        Ok(SendResponse { status: PaymentStatus::Complete })
    }

    fn subscribe(&self, listener: Box<dyn EventListener>) -> Result<(), EngineError> {
        self.listeners.write().unwrap_or_else(|p| p.into_inner()).push(listener);
        Ok(())
    }
}

#[async_trait]
impl PurchaseProvider for MemoryEngine {
    async fn prepare_purchase(&self, provider: PurchaseProviderKind, amount_sat: u64) -> Result<PrepareToken, EngineError> {
        let mut s = self.enter(Operation::PreparePurchase)?;
        let token = Self::next_token(&mut s, "purchase");
        s.pending.insert(token.as_str().to_string(), Pending::Purchase { provider, amount_sat });
        Ok(token)
    }

    async fn confirm_purchase(&self, token: &PrepareToken, redirect_url: &str) -> Result<Option<String>, EngineError> {
        let mut s = self.enter(Operation::ConfirmPurchase)?;
        let Some(Pending::Purchase { provider, amount_sat }) = s.pending.remove(token.as_str()) else {
            return Err(EngineError::new("unknown prepare token"));
        };
        if let Some(scripted) = s.purchase_results.pop_front() {
            return Ok(scripted);
        }
        Ok(Some(format!(
            "https://buy.memory/{}?amount_sat={}&redirect={}",
            provider.as_str(),
            amount_sat,
            redirect_url
        )))
    }
}

fn total_debit(amount_sat: u64, fee_sat: u64) -> Result<u64, EngineError> {
    amount_sat.checked_add(fee_sat).ok_or_else(|| EngineError::new("amount too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter(Arc<AtomicUsize>);
    impl EventListener for Counter {
        fn on_event(&self, _event: EngineEvent) { self.0.fetch_add(1, Ordering::SeqCst); }
    }

    #[tokio::test]
    async fn send_settles_instantly() {
        let engine = MemoryEngine::new().with_balance(10_000).with_fee(21);
        let seen = Arc::new(AtomicUsize::new(0));
        engine.subscribe(Box::new(Counter(seen.clone()))).unwrap();

        let prepared = engine.prepare_send("lnbc1qexample", 1_000).await.unwrap();
        assert_eq!(prepared.fee_sat, 21);
        let sent = engine.send(&prepared.token).await.unwrap();
        assert_eq!(sent.status, PaymentStatus::Complete);

        assert_eq!(engine.get_info().await.unwrap().balance_sat, 10_000 - 1_021);
        assert_eq!(engine.payments()[0].direction, PaymentDirection::Outbound);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        // tokens are single use
        assert!(engine.send(&prepared.token).await.is_err());
    }

    #[tokio::test]
    async fn huge_amounts_are_errors() {
        let engine = MemoryEngine::new().with_balance(10_000).with_fee(1);
        let err = engine.prepare_send("lnbc1qexample", u64::MAX).await.unwrap_err();
        assert_eq!(err.message, "amount too large");
        assert_eq!(engine.get_info().await.unwrap().balance_sat, 10_000);

        engine.settle_incoming(u64::MAX, None);
        assert_eq!(engine.get_info().await.unwrap().balance_sat, u64::MAX);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let engine = MemoryEngine::new();
        engine.fail_next(Operation::GetInfo, "first");
        engine.fail_next(Operation::GetInfo, "second");
        assert_eq!(engine.get_info().await.unwrap_err().message, "first");
        assert_eq!(engine.get_info().await.unwrap_err().message, "second");
        assert!(engine.get_info().await.is_ok());
        assert_eq!(engine.calls(Operation::GetInfo), 3);
    }

    #[tokio::test]
    async fn receive_destination_matches_method() {
        let engine = MemoryEngine::new();
        let p = engine.prepare_receive(5_000, SettlementMethod::Lightning).await.unwrap();
        assert!(engine.receive(&p.token).await.unwrap().destination.starts_with("lnbc5000"));
        let p = engine.prepare_receive(5_000, SettlementMethod::OnchainLiquid).await.unwrap();
        assert!(engine.receive(&p.token).await.unwrap().destination.starts_with("lq1q"));
    }

    #[tokio::test]
    async fn list_payments_honours_filter() {
        let engine = MemoryEngine::new();
        for n in 0..5 { engine.settle_incoming(100 + n, None); }
        let page = engine.list_payments(&PaymentFilter { limit: Some(2), offset: Some(1) }).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].amount_sat, 103);
    }
}
