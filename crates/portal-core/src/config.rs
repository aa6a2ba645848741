//! ============================================================================
//! Portal Configuration - Environment driven settings
//! ============================================================================
//! Defaults match the live portal. Every field can be overridden through a
//! `PORTAL_*` environment variable (the CLI loads `.env` first).
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::types::{Address, ChainId};

/// World API used for character and tribe lookups
pub const DEFAULT_WORLD_API_BASE: &str = "https://world-api-stillness.live.tech.evefrontier.com/v2";

/// Tribe whose members may enter the portal
pub const DEFAULT_REQUIRED_TRIBE_ID: u64 = 98000063;

/// Pyrope game chain (0xa9f1a1)
pub const DEFAULT_EXPECTED_CHAIN_ID: u64 = 695569;

/// Bounded wait for announced wallet providers
pub const DEFAULT_ANNOUNCE_WAIT_MS: u64 = 750;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Out-of-band help channel shown on the access denied view
pub const DEFAULT_HELP_URL: &str = "https://discord.gg/7ym36qS9";

pub const DEFAULT_ADMIN_WALLETS: &[&str] = &["0xd9a41d42240a7a2cf7f24138abb4a368759cd58a"];

/// Portal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub world_api_base: String,
    pub required_tribe_id: u64,
    pub announce_wait_ms: u64,
    /// Wallet names (or rdns) preferred when several providers announce
    pub preferred_wallets: Vec<String>,
    pub expected_chain_id: Option<ChainId>,
    pub help_url: String,
    pub admin_wallets: Vec<Address>,
    pub db_path: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            world_api_base: std::env::var("PORTAL_WORLD_API")
                .unwrap_or_else(|_| DEFAULT_WORLD_API_BASE.to_string()),
            required_tribe_id: env_u64("PORTAL_REQUIRED_TRIBE_ID").unwrap_or(DEFAULT_REQUIRED_TRIBE_ID),
            announce_wait_ms: env_u64("PORTAL_ANNOUNCE_WAIT_MS").unwrap_or(DEFAULT_ANNOUNCE_WAIT_MS),
            preferred_wallets: std::env::var("PORTAL_PREFERRED_WALLETS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            expected_chain_id: match std::env::var("PORTAL_EXPECTED_CHAIN_ID") {
                Ok(raw) if raw.trim().is_empty() => None,
                Ok(raw) => ChainId::parse(&raw)
                    .map_err(|e| warn!("Ignoring PORTAL_EXPECTED_CHAIN_ID: {}", e))
                    .ok(),
                Err(_) => Some(ChainId(DEFAULT_EXPECTED_CHAIN_ID)),
            },
            help_url: std::env::var("PORTAL_HELP_URL").unwrap_or_else(|_| DEFAULT_HELP_URL.to_string()),
            admin_wallets: match std::env::var("PORTAL_ADMIN_WALLETS") {
                Ok(raw) => parse_wallets(&split_list(&raw)),
                Err(_) => parse_wallets(DEFAULT_ADMIN_WALLETS),
            },
            db_path: std::env::var("PORTAL_DB_PATH").ok(),
            http_timeout_secs: env_u64("PORTAL_HTTP_TIMEOUT_SECS").unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl PortalConfig {
    pub fn announce_wait(&self) -> Duration {
        Duration::from_millis(self.announce_wait_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Invalid entries are logged and skipped
fn parse_wallets<S: AsRef<str>>(raw: &[S]) -> Vec<Address> {
    raw.iter()
        .filter_map(|w| match Address::parse(w.as_ref()) {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!("Skipping admin wallet: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("MetaMask, EVE Vault ,,"), vec!["MetaMask", "EVE Vault"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_parse_wallets_skips_invalid() {
        let wallets = parse_wallets(&["0xD9A41D42240A7A2CF7F24138ABB4A368759CD58A", "nope"]);
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].as_str(), "0xd9a41d42240a7a2cf7f24138abb4a368759cd58a");
    }

    #[test]
    fn test_default_admin_wallets_are_valid() {
        assert_eq!(parse_wallets(DEFAULT_ADMIN_WALLETS).len(), DEFAULT_ADMIN_WALLETS.len());
    }
}
