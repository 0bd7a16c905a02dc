//! RpcEngine - JSON-RPC 2.0 over WebSocket to an engine daemon
//!
//! One socket, two tasks. The writer drains an outgoing channel; the reader
//! resolves pending requests by id and hands `event` notifications to the
//! registered listeners.

use super::*;
use crate::purchase::{PurchaseProvider, PurchaseProviderKind};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Error code used when the socket goes away under a pending request.
const CONNECTION_CLOSED: i64 = -32000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcState {
    Connected,
    Disconnected,
}

type PendingMap = Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<Result<Value, EngineError>>>>>;
type Listeners = Arc<std::sync::RwLock<Vec<Box<dyn EventListener>>>>;

pub struct RpcEngine {
    url: String,
    tx: mpsc::Sender<String>,
    pending: PendingMap,
    listeners: Listeners,
    next_id: AtomicU64,
    state: Arc<RwLock<RpcState>>,
}

impl RpcEngine {
    /// Open the socket. Does not call the engine's `connect`.
    pub async fn open(url: impl Into<String>) -> anyhow::Result<Self> {
        let url = url.into();
        let (ws, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(32);
        let pending: PendingMap = Arc::default();
        let listeners: Listeners = Arc::default();
        let state = Arc::new(RwLock::new(RpcState::Connected));

        let state_w = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if write.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
            *state_w.write().await = RpcState::Disconnected;
        });

        let (state_r, pending_r, listeners_r) = (state.clone(), pending.clone(), listeners.clone());
        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                if let Message::Text(txt) = msg {
                    match parse_frame(&txt) {
                        Some(Frame::Response { id, result }) => {
                            let waiter = pending_r.lock().ok().and_then(|mut p| p.remove(&id));
                            if let Some(tx) = waiter {
                                let _ = tx.send(result);
                            }
                        }
                        Some(Frame::Event(event)) => {
                            let ls = listeners_r.read().unwrap_or_else(|p| p.into_inner());
                            for l in ls.iter() {
                                l.on_event(event.clone());
                            }
                        }
                        None => tracing::debug!("unparsed engine frame: {}", txt),
                    }
                }
            }
            *state_r.write().await = RpcState::Disconnected;
            let drained: Vec<_> = pending_r.lock().map(|mut p| p.drain().collect()).unwrap_or_default();
            for (_, tx) in drained {
                let _ = tx.send(Err(closed()));
            }
            tracing::info!("engine socket closed");
        });

        tracing::info!("engine socket open: {}", url);
        Ok(Self { url, tx: out_tx, pending, listeners, next_id: AtomicU64::new(1), state })
    }

    pub fn url(&self) -> &str { &self.url }

    pub async fn state(&self) -> RpcState { *self.state.read().await }

    /// Single request/response round trip.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().map_err(|_| EngineError::new("rpc lock"))?.insert(id, tx);
        if self.tx.send(request_frame(id, method, params)).await.is_err() {
            if let Ok(mut p) = self.pending.lock() { p.remove(&id); }
            return Err(closed());
        }
        rx.await.map_err(|_| closed())?
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, EngineError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| EngineError::new(format!("invalid {} response: {}", method, e)))
    }
}

fn closed() -> EngineError {
    EngineError::new("engine connection closed").with_code(CONNECTION_CLOSED)
}

#[derive(Debug)]
enum Frame {
    Response { id: u64, result: Result<Value, EngineError> },
    Event(EngineEvent),
}

fn request_frame(id: u64, method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
}

/// Parse an incoming frame. Notifications other than `event` are ignored.
fn parse_frame(msg: &str) -> Option<Frame> {
    let v: Value = serde_json::from_str(msg).ok()?;
    if let Some(id) = v.get("id").and_then(Value::as_u64) {
        let result = match v.get("error") {
            Some(err) if !err.is_null() => {
                let message = err.get("message").and_then(Value::as_str).unwrap_or("engine error");
                let mut e = EngineError::new(message);
                e.code = err.get("code").and_then(Value::as_i64);
                Err(e)
            }
            _ => Ok(v.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Some(Frame::Response { id, result });
    }
    match v.get("method")?.as_str()? {
        "event" => serde_json::from_value(v.get("params")?.clone()).ok().map(Frame::Event),
        _ => None,
    }
}

#[async_trait]
impl LedgerEngine for RpcEngine {
    async fn connect(&self, config: &EngineConfig, secret: &str) -> Result<(), EngineError> {
        self.call("connect", json!({"config": config, "mnemonic": secret})).await.map(|_| ())
    }

    async fn get_info(&self) -> Result<WalletInfo, EngineError> {
        self.call_as("get_info", json!({})).await
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>, EngineError> {
        self.call_as("list_payments", json!(filter)).await
    }

    async fn prepare_receive(&self, amount_sat: u64, method: SettlementMethod) -> Result<PrepareReceiveResponse, EngineError> {
        self.call_as("prepare_receive_payment", json!({"payer_amount_sat": amount_sat, "payment_method": method})).await
    }

    async fn receive(&self, token: &PrepareToken) -> Result<ReceiveResponse, EngineError> {
        self.call_as("receive_payment", json!({"prepare_token": token})).await
    }

    async fn prepare_send(&self, destination: &str, amount_sat: u64) -> Result<PrepareSendResponse, EngineError> {
        self.call_as("prepare_send_payment", json!({"destination": destination, "receiver_amount_sat": amount_sat})).await
    }

    async fn send(&self, token: &PrepareToken) -> Result<SendResponse, EngineError> {
        self.call_as("send_payment", json!({"prepare_token": token})).await
    }

    fn subscribe(&self, listener: Box<dyn EventListener>) -> Result<(), EngineError> {
        self.listeners.write().map_err(|_| EngineError::new("rpc lock"))?.push(listener);
        Ok(())
    }
}

#[async_trait]
impl PurchaseProvider for RpcEngine {
    async fn prepare_purchase(&self, provider: PurchaseProviderKind, amount_sat: u64) -> Result<PrepareToken, EngineError> {
        let v = self.call("prepare_buy_bitcoin", json!({"provider": provider, "amount_sat": amount_sat})).await?;
        let token = v.get("prepare_token").cloned().unwrap_or(v);
        serde_json::from_value(token).map_err(|e| EngineError::new(format!("invalid prepare_buy_bitcoin response: {}", e)))
    }

    /// Anything other than a JSON string comes back as `None`.
    async fn confirm_purchase(&self, token: &PrepareToken, redirect_url: &str) -> Result<Option<String>, EngineError> {
        let v = self.call("buy_bitcoin", json!({"prepare_token": token, "redirect_url": redirect_url})).await?;
        Ok(v.as_str().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frames_are_jsonrpc() {
        let frame: Value = serde_json::from_str(&request_frame(7, "get_info", json!({}))).unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["id"], 7);
        assert_eq!(frame["method"], "get_info");
    }

    #[test]
    fn parses_success_and_error_responses() {
        match parse_frame(r#"{"jsonrpc":"2.0","id":3,"result":{"balance_sat":5}}"#) {
            Some(Frame::Response { id: 3, result: Ok(v) }) => assert_eq!(v["balance_sat"], 5),
            other => panic!("unexpected {:?}", other),
        }
        match parse_frame(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-1,"message":"Invalid invoice"}}"#) {
            Some(Frame::Response { id: 4, result: Err(e) }) => {
                assert_eq!(e.message, "Invalid invoice");
                assert_eq!(e.code, Some(-1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_event_notifications() {
        let frame = parse_frame(r#"{"jsonrpc":"2.0","method":"event","params":{"type":"synced"}}"#);
        assert!(matches!(frame, Some(Frame::Event(EngineEvent::Synced))));
        assert!(parse_frame(r#"{"jsonrpc":"2.0","method":"log","params":{}}"#).is_none());
        assert!(parse_frame("not json").is_none());
    }
}
