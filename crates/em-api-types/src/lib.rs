use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WalletAddress(pub String);

impl WalletAddress {
    /// Accepts `0x` followed by exactly 40 hex digits; the original casing
    /// (checksum) is kept.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
        if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(raw.to_owned()))
    }

    /// `0x1234…abcd` form used by the view.
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex chain id as returned by `eth_chainId`, e.g. `0x4`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChainId(pub String);

impl ChainId {
    /// Accepts `0x`-prefixed hex or plain decimal and returns the canonical
    /// lower-case hex form without leading zeros.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok()?,
            None => raw.parse::<u64>().ok()?,
        };
        Some(Self(format!("{value:#x}")))
    }

    pub fn normalized(&self) -> Self {
        Self::parse(&self.0).unwrap_or_else(|| Self(self.0.to_ascii_lowercase()))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Describes a connectable wallet backend in the chooser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub backend_id: String,
    pub account: Option<WalletAddress>,
    pub chain_id: ChainId,
}

impl SessionInfo {
    pub fn connected(&self) -> bool {
        self.account.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Disconnected,
    Idle,
    Minting,
}

/// Everything the view needs. Published whole on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UiState {
    pub account: Option<WalletAddress>,
    pub minting: bool,
    pub mint_count: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            account: None,
            minting: false,
            mint_count: "0".to_owned(),
        }
    }
}

impl UiState {
    pub fn phase(&self) -> WorkflowPhase {
        match (&self.account, self.minting) {
            (None, _) => WorkflowPhase::Disconnected,
            (Some(_), true) => WorkflowPhase::Minting,
            (Some(_), false) => WorkflowPhase::Idle,
        }
    }
}

/// Decoded `NewEpicNFTMinted(address, uint256)` log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintedEvent {
    pub from: WalletAddress,
    pub token_id: u64,
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("no compatible wallet available: {0}")]
    ProviderUnavailable(String),
    #[error("user rejected the request: {0}")]
    UserRejected(String),
    #[error("chain error: {0}")]
    Chain(String),
    #[error("no wallet connected")]
    NotConnected,
    #[error("a mint is already in progress")]
    AlreadyMinting,
    #[error("session cache error: {0}")]
    Cache(String),
}

impl WorkflowError {
    pub fn chain(message: impl fmt::Display) -> Self {
        Self::Chain(message.to_string())
    }
}
