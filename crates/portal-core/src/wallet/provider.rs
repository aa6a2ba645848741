//! ============================================================================
//! Wallet Provider Interface - EIP-1193 shaped provider seam
//! ============================================================================
//! The portal only ever talks to a wallet through `WalletProvider` and only
//! discovers one through `ProviderHost`. Detection produces a
//! `ProviderHandle` so nothing downstream inspects raw provider shape again.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::types::{Address, ChainId, ProviderKind};

/// Provider RPC methods the portal uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    /// Silent account query, never prompts
    Accounts,
    /// Prompting account request
    RequestAccounts,
    ChainId,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::Accounts => "eth_accounts",
            RpcMethod::RequestAccounts => "eth_requestAccounts",
            RpcMethod::ChainId => "eth_chainId",
        }
    }
}

/// EIP-1193 provider RPC error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const DISCONNECTED: i64 = 4900;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(Self::USER_REJECTED, "User rejected the request.")
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == Self::USER_REJECTED
    }
}

/// Events a provider emits after a session exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// New account list, first entry is the active account
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    Disconnected,
}

/// A browser-exposed wallet implementing account requests
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: RpcMethod) -> Result<serde_json::Value, ProviderError>;

    /// Register a listener for account, chain and disconnect events
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Metadata a provider publishes when answering a discovery request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub rdns: String,
}

impl ProviderInfo {
    pub fn new(name: impl Into<String>, rdns: impl Into<String>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            rdns: rdns.into(),
        }
    }

    /// Case-insensitive match on display name or reverse-DNS id
    pub fn matches(&self, wanted: &str) -> bool {
        self.name.eq_ignore_ascii_case(wanted) || self.rdns.eq_ignore_ascii_case(wanted)
    }
}

/// Response to a discovery request
#[derive(Clone)]
pub struct ProviderAnnouncement {
    pub info: ProviderInfo,
    pub provider: Arc<dyn WalletProvider>,
}

impl fmt::Debug for ProviderAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderAnnouncement").field("info", &self.info).finish()
    }
}

/// The environment wallets live in (a browser window, or a headless stand-in)
pub trait ProviderHost: Send + Sync {
    /// Globally injected provider, if any
    fn injected(&self) -> Option<Arc<dyn WalletProvider>>;

    /// Register a listener for announcements. Each call adds a listener.
    fn listen_announcements(&self) -> mpsc::UnboundedReceiver<ProviderAnnouncement>;

    /// Broadcast a request asking installed wallets to announce themselves
    fn request_providers(&self);
}

/// Outcome of provider detection
#[derive(Clone, Default)]
pub enum ProviderHandle {
    Injected(Arc<dyn WalletProvider>),
    Announced {
        provider: Arc<dyn WalletProvider>,
        info: ProviderInfo,
    },
    #[default]
    None,
}

impl ProviderHandle {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderHandle::Injected(_) => ProviderKind::Injected,
            ProviderHandle::Announced { .. } => ProviderKind::Announced,
            ProviderHandle::None => ProviderKind::None,
        }
    }

    pub fn provider(&self) -> Option<&Arc<dyn WalletProvider>> {
        match self {
            ProviderHandle::Injected(provider) | ProviderHandle::Announced { provider, .. } => Some(provider),
            ProviderHandle::None => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ProviderHandle::Announced { info, .. } => Some(&info.name),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, ProviderHandle::None)
    }

    /// Whether both handles point at the same provider instance
    pub fn same_provider(&self, other: &ProviderHandle) -> bool {
        match (self.provider(), other.provider()) {
            (Some(a), Some(b)) => Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const (),
            _ => false,
        }
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderHandle::Injected(_) => f.write_str("Injected"),
            ProviderHandle::Announced { info, .. } => write!(f, "Announced({})", info.name),
            ProviderHandle::None => f.write_str("None"),
        }
    }
}
