//! Engine data model. Everything the engine hands back is plain data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" | "main" => Some(Network::Mainnet),
            "testnet" | "test" => Some(Network::Testnet),
            "regtest" | "local" => Some(Network::Regtest),
            _ => None,
        }
    }
}

/// Handed to the engine on `connect`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub network: Network,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletInfo {
    pub balance_sat: u64,
    pub pending_receive_sat: u64,
    pub pending_send_sat: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Complete,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Complete => "complete",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// One entry of the engine's payment history. Never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub amount_sat: u64,
    pub direction: PaymentDirection,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl fmt::Display for PaymentRecord {
    /// `-1500 SAT  coffee  COMPLETE`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            PaymentDirection::Outbound => '-',
            PaymentDirection::Inbound => '+',
        };
        write!(
            f,
            "{}{} SAT  {}  {}",
            sign,
            self.amount_sat,
            self.description.as_deref().unwrap_or("No description"),
            self.status.as_str().to_ascii_uppercase()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

/// Rails the engine can receive on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMethod {
    Lightning,
    #[serde(rename = "bitcoin_address")]
    OnchainBitcoin,
    #[serde(rename = "liquid_address")]
    OnchainLiquid,
}

impl SettlementMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementMethod::Lightning => "lightning",
            SettlementMethod::OnchainBitcoin => "bitcoin",
            SettlementMethod::OnchainLiquid => "liquid",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lightning" | "ln" => Some(SettlementMethod::Lightning),
            "bitcoin" | "btc" | "onchain" | "bitcoin_address" => Some(SettlementMethod::OnchainBitcoin),
            "liquid" | "lbtc" | "liquid_address" => Some(SettlementMethod::OnchainLiquid),
            _ => None,
        }
    }
}

/// Opaque handle returned by a prepare call. Only the engine interprets it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrepareToken(String);

impl PrepareToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrepareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrepareToken(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReceiveResponse {
    pub fee_sat: u64,
    pub token: PrepareToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveResponse {
    /// Invoice or address the payer should use.
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareSendResponse {
    pub fee_sat: u64,
    pub token: PrepareToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub status: PaymentStatus,
}

/// Push events from the engine, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Synced,
    PaymentPending {
        #[serde(default)]
        details: Option<PaymentRecord>,
    },
    PaymentSucceeded {
        #[serde(default)]
        details: Option<PaymentRecord>,
    },
    PaymentFailed {
        #[serde(default)]
        details: Option<PaymentRecord>,
    },
    #[serde(other)]
    Other,
}
