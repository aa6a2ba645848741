//! ============================================================================
//! Admin Registry - Approved users and admin activity log
//! ============================================================================
//! Admin wallets come from configuration and can never be revoked. Approved
//! users are persisted under `approved_users`; every approval and revocation
//! is logged under `admin_activity`, keeping the latest 50 entries.
//! Admin status only applies to a wallet that already passed the tribe gate.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{keys, KeyValueStore, StoreExt};
use crate::types::{Address, PortalError};

/// Activity entries kept in the log
pub const MAX_ACTIVITY_ENTRIES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Approved,
    Revoked,
}

impl AdminAction {
    pub fn display_name(&self) -> &'static str {
        match self {
            AdminAction::Approved => "User Approved",
            AdminAction::Revoked => "User Revoked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminActivity {
    pub action: AdminAction,
    pub address: Address,
    /// Acting admin, when known
    pub admin: Option<Address>,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

pub struct AdminRegistry {
    store: Arc<dyn KeyValueStore>,
    admin_wallets: Vec<Address>,
}

impl AdminRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, admin_wallets: Vec<Address>) -> Self {
        Self { store, admin_wallets }
    }

    pub fn is_admin_wallet(&self, address: &Address) -> bool {
        self.admin_wallets.contains(address)
    }

    /// Approved users, seeded with the admin wallets on first use
    pub fn approved_users(&self) -> Result<Vec<Address>, PortalError> {
        match self.store.get_json::<Vec<Address>>(keys::APPROVED_USERS).map_err(storage)? {
            Some(users) => Ok(users),
            None => {
                let seeded = self.admin_wallets.clone();
                self.store
                    .set_json(keys::APPROVED_USERS, &seeded)
                    .map_err(storage)?;
                info!("Seeded approved users with {} admin wallets", seeded.len());
                Ok(seeded)
            }
        }
    }

    pub fn is_approved(&self, address: &Address) -> Result<bool, PortalError> {
        Ok(self.is_admin_wallet(address) || self.approved_users()?.contains(address))
    }

    /// Approve a wallet for the admin panel
    pub fn approve(&self, raw: &str, by: Option<&Address>) -> Result<Address, PortalError> {
        let address = Address::parse(raw)?;
        let mut users = self.approved_users()?;
        if users.contains(&address) {
            return Err(PortalError::AlreadyApproved(address.to_string()));
        }

        users.push(address.clone());
        self.store
            .set_json(keys::APPROVED_USERS, &users)
            .map_err(storage)?;
        self.log_activity(AdminAction::Approved, &address, by)?;

        info!("Approved user {}", address);
        Ok(address)
    }

    /// Revoke an approved wallet. Admin wallets cannot be revoked.
    pub fn revoke(&self, raw: &str, by: Option<&Address>) -> Result<Address, PortalError> {
        let address = Address::parse(raw)?;
        let mut users = self.approved_users()?;
        if !users.contains(&address) {
            return Err(PortalError::NotApproved(address.to_string()));
        }
        if self.is_admin_wallet(&address) {
            warn!("Refusing to revoke admin wallet {}", address);
            return Err(PortalError::ProtectedAdmin(address.to_string()));
        }

        users.retain(|u| u != &address);
        self.store
            .set_json(keys::APPROVED_USERS, &users)
            .map_err(storage)?;
        self.log_activity(AdminAction::Revoked, &address, by)?;

        info!("Revoked user {}", address);
        Ok(address)
    }

    /// Approved users whose address contains `term` (case-insensitive)
    pub fn search(&self, term: &str) -> Result<Vec<Address>, PortalError> {
        let needle = term.trim().to_lowercase();
        let users = self.approved_users()?;
        if needle.is_empty() {
            return Ok(users);
        }
        Ok(users
            .into_iter()
            .filter(|u| u.as_str().contains(&needle))
            .collect())
    }

    /// Full log, oldest first
    pub fn activity(&self) -> Result<Vec<AdminActivity>, PortalError> {
        Ok(self
            .store
            .get_json::<Vec<AdminActivity>>(keys::ADMIN_ACTIVITY)
            .map_err(storage)?
            .unwrap_or_default())
    }

    /// Latest `limit` entries, newest first
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<AdminActivity>, PortalError> {
        Ok(self.activity()?.into_iter().rev().take(limit).collect())
    }

    fn log_activity(&self, action: AdminAction, address: &Address, by: Option<&Address>) -> Result<(), PortalError> {
        let mut log = self.activity()?;
        log.push(AdminActivity {
            action,
            address: address.clone(),
            admin: by.cloned(),
            timestamp: chrono::Utc::now().timestamp(),
        });
        if log.len() > MAX_ACTIVITY_ENTRIES {
            let excess = log.len() - MAX_ACTIVITY_ENTRIES;
            log.drain(..excess);
        }
        self.store
            .set_json(keys::ADMIN_ACTIVITY, &log)
            .map_err(storage)
    }
}

fn storage(err: anyhow::Error) -> PortalError {
    PortalError::Storage(err.to_string())
}
