//! ============================================================================
//! Access Types - Membership records, gate states and display profiles
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Address, PortalError, WalletSession};

/// Portrait shown when a character has none
pub const DEFAULT_PORTRAIT_URL: &str = "https://artifacts.evefrontier.com/portraits/PortraitAwakened256.png";

pub const UNKNOWN_CHARACTER: &str = "Unknown Character";

/// A wallet's in-game character and the tribe it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub holder_address: Address,
    pub group_id: u64,
    pub display_name: String,
    pub portrait_url: String,
}

/// Access gate state. Exactly one value at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessState {
    #[default]
    Unconnected,
    Connecting,
    Denied,
    Granted,
    Error(PortalError),
}

impl AccessState {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessState::Granted)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AccessState::Unconnected => "unconnected",
            AccessState::Connecting => "connecting",
            AccessState::Denied => "denied",
            AccessState::Granted => "granted",
            AccessState::Error(_) => "error",
        }
    }
}

/// One step of the gate's state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: AccessState,
    pub to: AccessState,
}

/// Display data for an unlocked (or previewed) session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalProfile {
    pub name: String,
    pub portrait_url: String,
    pub address: Address,
    pub short_address: String,
    pub tribe_id: u64,
    pub is_admin: bool,
    /// Wallet is on a chain other than the configured game chain
    pub wrong_network: bool,
}

impl PortalProfile {
    pub fn new(record: &MembershipRecord, session: Option<&WalletSession>) -> Self {
        let address = session
            .map(|s| s.address.clone())
            .unwrap_or_else(|| record.holder_address.clone());
        Self {
            name: record.display_name.clone(),
            portrait_url: record.portrait_url.clone(),
            short_address: address.short(),
            address,
            tribe_id: record.group_id,
            is_admin: false,
            wrong_network: false,
        }
    }
}

/// Tribe member as listed by the world API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TribeMember {
    pub name: String,
    pub address: Address,
}

/// Tribe and its member list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TribeRoster {
    pub id: u64,
    pub name: String,
    pub members: Vec<TribeMember>,
}

impl TribeRoster {
    pub fn contains(&self, address: &Address) -> bool {
        self.members.iter().any(|m| &m.address == address)
    }
}
