//! Purchase - fiat-to-sats checkout through a third-party provider
//!
//! The provider is reached through the engine (`prepare_purchase` then
//! `confirm_purchase`) and answers with a checkout URL. Generating that URL is
//! safe to repeat, so it is retried under a [`RetryPolicy`]; settlement calls
//! elsewhere in the crate never are.
//!
//! ```text
//! purchase("25000")
//!     │
//!     ├── attempt 0: prepare_purchase → confirm_purchase ──✗── sleep(backoff)
//!     ├── attempt 1: prepare_purchase → confirm_purchase ──✓── url
//!     │
//!     └── RedirectHandler::hand_off(url) → state = Completed
//! ```

mod retry;

pub use retry::{RetryDecision, RetryPolicy, RetryState};

use crate::engine::{EngineError, PrepareToken};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Fallback when the entered amount is unusable.
pub const DEFAULT_PURCHASE_SAT: u64 = 25_000;

/// Upstream fault that clears up on its own after a short while.
const TRANSIENT_MARKER: &str = "signature check failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseProviderKind {
    #[default]
    MoonPay,
}

impl PurchaseProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self { PurchaseProviderKind::MoonPay => "moonpay" }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "moonpay" => Some(PurchaseProviderKind::MoonPay),
            _ => None,
        }
    }
}

impl fmt::Display for PurchaseProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { PurchaseProviderKind::MoonPay => f.write_str("MoonPay") }
    }
}

#[async_trait]
pub trait PurchaseProvider: Send + Sync {
    async fn prepare_purchase(&self, provider: PurchaseProviderKind, amount_sat: u64) -> Result<PrepareToken, EngineError>;
    /// `None` when the provider answered with something other than a URL.
    async fn confirm_purchase(&self, token: &PrepareToken, redirect_url: &str) -> Result<Option<String>, EngineError>;
}

/// Takes the checkout URL off our hands (browser, deep link, stdout).
pub trait RedirectHandler: Send + Sync {
    fn hand_off(&self, url: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseConfig {
    pub provider: PurchaseProviderKind,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub default_amount_sat: u64,
    /// Scheme of the URL the provider sends the user back to.
    pub redirect_scheme: String,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            provider: PurchaseProviderKind::MoonPay,
            max_attempts: 2,
            backoff: Duration::from_secs(1),
            default_amount_sat: DEFAULT_PURCHASE_SAT,
            redirect_scheme: "walletflow".into(),
        }
    }
}

impl PurchaseConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy { max_attempts: self.max_attempts, backoff: self.backoff }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurchaseRequest {
    pub amount_sat: u64,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PurchaseState {
    Idle,
    InProgress(PurchaseRequest),
    Completed { url: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PurchaseError {
    #[error("Temporary {0} service issue. Please try again in a moment.")]
    Transient(PurchaseProviderKind),
    #[error("{0}")]
    Provider(String),
    #[error("Failed to process {0} purchase")]
    Generic(PurchaseProviderKind),
    #[error("Failed to generate {0} URL after retries")]
    NoUrl(PurchaseProviderKind),
    #[error("could not open {0} checkout: {1}")]
    Handoff(PurchaseProviderKind, String),
    #[error("{0} purchase already in progress")]
    Busy(PurchaseProviderKind),
}

impl PurchaseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PurchaseError::Transient(_))
    }
}

#[derive(Debug, Clone)]
enum AttemptError {
    Provider(EngineError),
    NoUrl,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Provider(e) => write!(f, "{}", e),
            AttemptError::NoUrl => f.write_str("provider returned no URL"),
        }
    }
}

fn classify(err: AttemptError, provider: PurchaseProviderKind) -> PurchaseError {
    match err {
        AttemptError::Provider(e) if e.message.to_ascii_lowercase().contains(TRANSIENT_MARKER) => PurchaseError::Transient(provider),
        AttemptError::Provider(e) if e.message.trim().is_empty() => PurchaseError::Generic(provider),
        AttemptError::Provider(e) => PurchaseError::Provider(e.message),
        AttemptError::NoUrl => PurchaseError::NoUrl(provider),
    }
}

/// Amount entered as text. Anything that is not a positive number falls back.
pub fn parse_amount(input: &str, fallback_sat: u64) -> u64 {
    match input.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 1.0 => n.floor() as u64,
        _ => fallback_sat,
    }
}

/// `<scheme>://<provider>?ts=<millis>&ref=<6 chars>`, unique per attempt.
pub fn redirect_url(scheme: &str, provider: PurchaseProviderKind) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let reference: String = (0..6).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect();
    format!("{}://{}?ts={}&ref={}", scheme, provider.as_str(), chrono::Utc::now().timestamp_millis(), reference)
}

pub struct PurchaseFlow {
    provider: Arc<dyn PurchaseProvider>,
    redirect: Arc<dyn RedirectHandler>,
    config: PurchaseConfig,
    state: Mutex<PurchaseState>,
}

impl PurchaseFlow {
    pub fn new(provider: Arc<dyn PurchaseProvider>, redirect: Arc<dyn RedirectHandler>, config: PurchaseConfig) -> Self {
        Self { provider, redirect, config, state: Mutex::new(PurchaseState::Idle) }
    }

    pub fn state(&self) -> PurchaseState { self.lock().clone() }

    pub fn config(&self) -> &PurchaseConfig { &self.config }

    /// Amount as typed by the user.
    pub async fn purchase(&self, amount_input: &str) -> Result<String, PurchaseError> {
        self.purchase_sat(parse_amount(amount_input, self.config.default_amount_sat)).await
    }

    pub async fn purchase_sat(&self, amount_sat: u64) -> Result<String, PurchaseError> {
        let provider = self.config.provider;
        let amount_sat = if amount_sat == 0 { self.config.default_amount_sat } else { amount_sat };
        {
            let mut state = self.lock();
            if matches!(*state, PurchaseState::InProgress(_)) {
                return Err(PurchaseError::Busy(provider));
            }
            *state = PurchaseState::InProgress(PurchaseRequest { amount_sat, attempt: 0 });
        }
        tracing::info!(amount_sat, "{} purchase started", provider);

        let outcome = self.config.policy().run(|attempt| self.attempt(amount_sat, attempt)).await;
        let result = match outcome {
            Ok(url) => match self.redirect.hand_off(&url) {
                Ok(()) => Ok(url),
                Err(e) => Err(PurchaseError::Handoff(provider, e.to_string())),
            },
            Err(e) => Err(classify(e, provider)),
        };

        // in-progress state is only cleared once the URL has been handed off
        let mut state = self.lock();
        match &result {
            Ok(url) => {
                tracing::info!("{} checkout handed off", provider);
                *state = PurchaseState::Completed { url: url.clone() };
            }
            Err(e) => {
                tracing::error!("{} purchase failed: {}", provider, e);
                *state = PurchaseState::Failed { message: e.to_string() };
            }
        }
        result
    }

    /// Back to `Idle` once the user has dismissed the result.
    pub fn clear(&self) {
        let mut state = self.lock();
        if !matches!(*state, PurchaseState::InProgress(_)) {
            *state = PurchaseState::Idle;
        }
    }

    async fn attempt(&self, amount_sat: u64, attempt: u32) -> Result<String, AttemptError> {
        if let PurchaseState::InProgress(req) = &mut *self.lock() {
            req.attempt = attempt;
        }
        let provider = self.config.provider;
        let token = self.provider.prepare_purchase(provider, amount_sat).await.map_err(AttemptError::Provider)?;
        let redirect = redirect_url(&self.config.redirect_scheme, provider);
        match self.provider.confirm_purchase(&token, &redirect).await.map_err(AttemptError::Provider)? {
            Some(url) => Ok(url),
            None => Err(AttemptError::NoUrl),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PurchaseState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_falls_back_when_unusable() {
        assert_eq!(parse_amount("50000", DEFAULT_PURCHASE_SAT), 50_000);
        assert_eq!(parse_amount(" 1200.9 ", DEFAULT_PURCHASE_SAT), 1_200);
        assert_eq!(parse_amount("", DEFAULT_PURCHASE_SAT), 25_000);
        assert_eq!(parse_amount("abc", DEFAULT_PURCHASE_SAT), 25_000);
        assert_eq!(parse_amount("-10", DEFAULT_PURCHASE_SAT), 25_000);
        assert_eq!(parse_amount("0", DEFAULT_PURCHASE_SAT), 25_000);
    }

    #[test]
    fn signature_check_maps_to_transient() {
        let err = classify(AttemptError::Provider(EngineError::new("MoonPay: Signature check failed (401)")), PurchaseProviderKind::MoonPay);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Temporary MoonPay service issue. Please try again in a moment.");

        let err = classify(AttemptError::Provider(EngineError::new("Amount too low")), PurchaseProviderKind::MoonPay);
        assert_eq!(err, PurchaseError::Provider("Amount too low".into()));

        let err = classify(AttemptError::Provider(EngineError::new("  ")), PurchaseProviderKind::MoonPay);
        assert_eq!(err.to_string(), "Failed to process MoonPay purchase");

        assert_eq!(classify(AttemptError::NoUrl, PurchaseProviderKind::MoonPay).to_string(), "Failed to generate MoonPay URL after retries");
    }

    #[test]
    fn redirect_urls_are_unique() {
        let a = redirect_url("walletflow", PurchaseProviderKind::MoonPay);
        let b = redirect_url("walletflow", PurchaseProviderKind::MoonPay);
        assert!(a.starts_with("walletflow://moonpay?ts="));
        assert!(a.contains("&ref="));
        assert_eq!(a.rsplit("ref=").next().map(str::len), Some(6));
        assert_ne!(a, b);
    }
}
