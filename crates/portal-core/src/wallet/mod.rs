//! ============================================================================
//! Wallet Module - Provider discovery and session management
//! ============================================================================
//! ## Flow
//! ```text
//! ProviderHost ──detect()──▶ ProviderHandle ──connect()/check_existing()──▶ WalletSession
//!                                                 ▲
//!              accountsChanged / chainChanged / disconnect ──on_event()──┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use portal_core::wallet::{ProviderDetector, SessionConnector};
//!
//! let mut detector = ProviderDetector::new(host, config.announce_wait(), config.preferred_wallets.clone());
//! let handle = detector.detect().await;
//! let session = connector.connect(&handle).await?;
//! ```
//! ============================================================================

mod connector;
mod detector;
mod provider;
mod static_provider;

pub use connector::{SessionChange, SessionConnector};
pub use detector::ProviderDetector;
pub use provider::{
    ProviderAnnouncement, ProviderError, ProviderEvent, ProviderHandle, ProviderHost, ProviderInfo,
    RpcMethod, WalletProvider,
};
pub use static_provider::{StaticHost, StaticProvider};
