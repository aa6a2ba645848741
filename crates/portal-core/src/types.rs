//! ============================================================================
//! Core Types - Shared data structures for the tribe portal
//! ============================================================================
//! Wallet identities, chain identifiers, sessions and the error taxonomy used
//! across the wallet, access and admin modules.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Wallet Identity Types
// ============================================================================

/// Lowercase hex wallet address (`0x` + 20 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, PortalError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| PortalError::InvalidAddress(raw.to_string()))?;

        let bytes = hex::decode(digits).map_err(|_| PortalError::InvalidAddress(raw.to_string()))?;
        if bytes.len() != 20 {
            return Err(PortalError::InvalidAddress(raw.to_string()));
        }

        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in profile badges: `0x1234...abcd`
    pub fn short(&self) -> String {
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// EVM chain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl ChainId {
    /// Parse either the EIP-1193 hex form (`0xa9f1a1`) or a decimal string
    pub fn parse(raw: &str) -> Result<Self, PortalError> {
        let trimmed = raw.trim();
        let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(ChainId)
            .map_err(|_| PortalError::InvalidChainId(raw.to_string()))
    }

    pub fn to_hex(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the wallet provider in use was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Globally injected provider
    Injected,
    /// Provider answered a discovery announcement request
    Announced,
    /// No wallet available
    #[default]
    None,
}

/// Connected wallet for the current page lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSession {
    pub address: Address,
    pub chain_id: ChainId,
    pub provider_kind: ProviderKind,
}

// ============================================================================
// Error Types
// ============================================================================

/// Error types for the portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PortalError {
    #[error("No wallet provider available: {0}")]
    ProviderUnavailable(String),

    #[error("Wallet connection rejected: {0}")]
    ConnectionRejected(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("No tribe membership found for {0}")]
    NotFound(String),

    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Invalid chain id: {0}")]
    InvalidChainId(String),

    #[error("User {0} is already approved")]
    AlreadyApproved(String),

    #[error("User {0} is not in the approved list")]
    NotApproved(String),

    #[error("Cannot remove admin wallet {0}")]
    ProtectedAdmin(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PortalError {
    /// Whether the user can usefully try connecting again
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PortalError::NotFound(_))
    }
}
