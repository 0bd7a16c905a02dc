//! Node Configuration - built by the caller or read from the environment

use crate::engine::{EngineConfig, Network, PaymentFilter};
use crate::error::{FlowError, FlowResult};
use crate::purchase::PurchaseConfig;
use crate::sync::{SyncConfig, DEFAULT_SYNC_BUFFER};
use std::env;
use std::path::{Path, PathBuf};

pub const ENV_NETWORK: &str = "WALLETFLOW_NETWORK";
pub const ENV_API_KEY: &str = "WALLETFLOW_API_KEY";
pub const ENV_MNEMONIC: &str = "WALLETFLOW_MNEMONIC";
pub const ENV_ENGINE_URL: &str = "WALLETFLOW_ENGINE_URL";
pub const ENV_SYNC_BUFFER: &str = "WALLETFLOW_SYNC_BUFFER";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub network: Network,
    pub api_key: Option<String>,
    /// Secret handed to the engine on connect.
    pub mnemonic: Option<String>,
    /// `ws://` / `wss://` engine daemon. `None` means the in-memory engine.
    pub engine_url: Option<String>,
    pub sync_buffer: usize,
    pub payment_filter: PaymentFilter,
    pub purchase: PurchaseConfig,
    pub working_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            api_key: None,
            mnemonic: None,
            engine_url: None,
            sync_buffer: DEFAULT_SYNC_BUFFER,
            payment_filter: PaymentFilter::default(),
            purchase: PurchaseConfig::default(),
            working_dir: None,
        }
    }
}

impl NodeConfig {
    pub fn new(network: Network) -> Self {
        Self { network, ..Default::default() }
    }
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self { self.api_key = Some(key.into()); self }
    pub fn with_mnemonic(mut self, m: impl Into<String>) -> Self { self.mnemonic = Some(m.into()); self }
    pub fn with_engine_url(mut self, url: impl Into<String>) -> Self { self.engine_url = Some(url.into()); self }
    pub fn with_sync_buffer(mut self, n: usize) -> Self { self.sync_buffer = n; self }
    pub fn with_payment_filter(mut self, f: PaymentFilter) -> Self { self.payment_filter = f; self }
    pub fn with_purchase(mut self, c: PurchaseConfig) -> Self { self.purchase = c; self }
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self { self.working_dir = Some(dir.into()); self }

    /// Defaults overlaid with `WALLETFLOW_*` variables. Empty values count as unset.
    pub fn from_env() -> FlowResult<Self> {
        let mut config = Self::default();
        if let Some(v) = var(ENV_NETWORK) {
            config.network = Network::from_str(&v).ok_or_else(|| FlowError::Config(format!("unknown network {:?}", v)))?;
        }
        config.api_key = var(ENV_API_KEY);
        config.mnemonic = var(ENV_MNEMONIC);
        config.engine_url = var(ENV_ENGINE_URL);
        if let Some(v) = var(ENV_SYNC_BUFFER) {
            config.sync_buffer = match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(FlowError::Config(format!("{} must be a positive integer", ENV_SYNC_BUFFER))),
            };
        }
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig { network: self.network, api_key: self.api_key.clone(), working_dir: self.working_dir.clone() }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig { buffer: self.sync_buffer, filter: self.payment_filter }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Load `KEY=VALUE` lines into the process environment. Variables that are
/// already set win. Returns how many were applied.
pub fn load_env_file(path: impl AsRef<Path>) -> std::io::Result<usize> {
    let contents = std::fs::read_to_string(path)?;
    let mut applied = 0;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if !key.is_empty() && !value.is_empty() && env::var(key).is_err() {
                env::set_var(key, value);
                applied += 1;
            }
        }
    }
    Ok(applied)
}
