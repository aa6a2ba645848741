//! ============================================================================
//! Access Module - Tribe-gated access control for the portal
//! ============================================================================
//! Decides whether the connected wallet may see protected content.
//!
//! ## States
//! - **Unconnected**: No wallet session
//! - **Connecting**: Session established, tribe check in flight
//! - **Granted**: Character belongs to the required tribe
//! - **Denied**: No character, or a different tribe
//! - **Error**: No provider, rejected prompt, or world API unreachable (retryable)
//!
//! ## Usage
//! ```rust,ignore
//! use portal_core::access::AccessGate;
//!
//! let mut gate = AccessGate::new(&config, host, Arc::new(world_api), store);
//! gate.restore().await;
//! if !gate.state().is_granted() {
//!     gate.connect().await;
//! }
//! let view = gate.view();
//! ```
//! ============================================================================

mod checker;
mod gate;
mod types;
mod view;

// Re-export public types
pub use checker::{has_access, MembershipSource, TribeVerifier, Verdict};
pub use gate::{AccessGate, GateCommand, GateReaction};
pub use types::{
    AccessState, MembershipRecord, PortalProfile, StateTransition, TribeMember, TribeRoster,
    DEFAULT_PORTRAIT_URL, UNKNOWN_CHARACTER,
};
pub use view::GateView;
