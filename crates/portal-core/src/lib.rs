//! ============================================================================
//! PORTAL-CORE: Wallet identity and tribe access gate
//! ============================================================================
//! This crate handles all backend logic for the tribe portal:
//! - Wallet provider discovery (injected and announced providers)
//! - Wallet session connect, silent restore and provider events
//! - Tribe membership lookups against the world API
//! - The access state machine guarding protected content
//! - Approved-user registry and admin activity log
//! ============================================================================

pub mod access;
pub mod admin;
pub mod config;
pub mod db;
pub mod types;
pub mod wallet;
pub mod world_api;

// Re-export main types for convenience
pub use access::{AccessGate, AccessState, GateView, MembershipRecord, PortalProfile};
pub use admin::{AdminActivity, AdminRegistry};
pub use config::PortalConfig;
pub use db::{KeyValueStore, MemoryStore, PortalDb};
pub use types::*;
pub use world_api::WorldApiClient;
