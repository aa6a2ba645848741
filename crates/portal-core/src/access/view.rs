//! Presentation model derived from the gate state.

use serde::Serialize;

use super::types::PortalProfile;

/// Exactly one of these is rendered at a time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum GateView {
    /// Connect prompt; `install_wallet` when no provider was found
    WalletRequired {
        install_wallet: bool,
        connect_enabled: bool,
    },
    /// Verification in flight; optional preview from the cached record
    Connecting { preview: Option<PortalProfile> },
    /// Not a tribe member. Stays until the wallet is disconnected.
    AccessDenied {
        short_address: Option<String>,
        help_url: String,
    },
    Unlocked(PortalProfile),
    /// Retryable failure
    Failed {
        message: String,
        install_wallet: bool,
        connect_enabled: bool,
    },
}

impl GateView {
    pub fn shows_protected_content(&self) -> bool {
        matches!(self, GateView::Unlocked(_))
    }

    pub fn connect_enabled(&self) -> bool {
        match self {
            GateView::WalletRequired { connect_enabled, .. } | GateView::Failed { connect_enabled, .. } => {
                *connect_enabled
            }
            GateView::Connecting { .. } | GateView::AccessDenied { .. } | GateView::Unlocked(_) => false,
        }
    }
}
