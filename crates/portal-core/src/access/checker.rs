//! ============================================================================
//! Tribe Checker - Membership lookup and the access predicate
//! ============================================================================
//! Resolves a wallet to its character's tribe and decides whether that tribe
//! opens the portal. Network failures are kept apart from non-membership so
//! the gate can offer a retry instead of a denial.
//! ============================================================================

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{MembershipRecord, TribeRoster};
use crate::types::{Address, PortalError};

/// Read-only source of membership data (the world API in production)
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Character record for a wallet. `NotFound` when it belongs to no tribe.
    async fn smart_character(&self, address: &Address) -> Result<MembershipRecord, PortalError>;

    async fn tribe(&self, tribe_id: u64) -> Result<TribeRoster, PortalError>;
}

/// Access iff a record exists and its group is the required one
pub fn has_access(record: Option<&MembershipRecord>, required_group_id: u64) -> bool {
    match record {
        Some(record) => {
            let granted = record.group_id == required_group_id;
            debug!(
                "Tribe check: {} == {} = {}",
                record.group_id, required_group_id, granted
            );
            granted
        }
        None => {
            debug!("Tribe check: no membership record");
            false
        }
    }
}

/// Result of verifying one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Granted(MembershipRecord),
    /// Not a member; carries the record when the character exists
    Denied(Option<MembershipRecord>),
    /// Lookup failed; says nothing about membership
    Unavailable(PortalError),
}

/// Checks wallets against the required tribe
pub struct TribeVerifier {
    source: Arc<dyn MembershipSource>,
    required_group_id: u64,
}

impl TribeVerifier {
    pub fn new(source: Arc<dyn MembershipSource>, required_group_id: u64) -> Self {
        Self {
            source,
            required_group_id,
        }
    }

    pub fn required_group_id(&self) -> u64 {
        self.required_group_id
    }

    /// Single read-only lookup, never retried
    pub async fn fetch_membership(&self, address: &Address) -> Result<MembershipRecord, PortalError> {
        debug!("Fetching membership for {}", address);
        self.source.smart_character(address).await
    }

    pub async fn fetch_roster(&self, tribe_id: u64) -> Result<TribeRoster, PortalError> {
        self.source.tribe(tribe_id).await
    }

    /// Fetch and evaluate in one step
    pub async fn verify(&self, address: &Address) -> Verdict {
        match self.fetch_membership(address).await {
            Ok(record) if has_access(Some(&record), self.required_group_id) => {
                info!("Tribe membership verified for {} ({})", address, record.display_name);
                Verdict::Granted(record)
            }
            Ok(record) => {
                warn!(
                    "Access denied for {}: tribe {} is not {}",
                    address, record.group_id, self.required_group_id
                );
                Verdict::Denied(Some(record))
            }
            Err(PortalError::NotFound(_)) => {
                warn!("Access denied for {}: no tribe membership", address);
                Verdict::Denied(None)
            }
            Err(e) => {
                warn!("Membership lookup failed for {}: {}", address, e);
                Verdict::Unavailable(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::FakeMembership;
    use super::*;
    use proptest::prelude::*;

    const TRIBE: u64 = 98000063;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn record(group_id: u64) -> MembershipRecord {
        MembershipRecord {
            holder_address: addr(1),
            group_id,
            display_name: "Vex".into(),
            portrait_url: String::new(),
        }
    }

    #[test]
    fn test_has_access() {
        assert!(has_access(Some(&record(TRIBE)), TRIBE));
        assert!(!has_access(Some(&record(12345)), TRIBE));
        assert!(!has_access(None, TRIBE));
    }

    proptest! {
        #[test]
        fn prop_access_iff_group_matches(group in any::<u64>(), required in any::<u64>(), present in any::<bool>()) {
            let rec = record(group);
            let input = if present { Some(&rec) } else { None };
            prop_assert_eq!(has_access(input, required), present && group == required);
        }
    }

    #[tokio::test]
    async fn test_verify_outcomes() {
        let source = FakeMembership::default()
            .member(&addr(1), TRIBE, "Member")
            .member(&addr(2), 12345, "Outsider")
            .failing(&addr(3), PortalError::NetworkError("HTTP 503".into()));
        let verifier = TribeVerifier::new(Arc::new(source), TRIBE);

        assert!(matches!(verifier.verify(&addr(1)).await, Verdict::Granted(r) if r.display_name == "Member"));
        assert!(matches!(verifier.verify(&addr(2)).await, Verdict::Denied(Some(r)) if r.group_id == 12345));
        assert_eq!(verifier.verify(&addr(4)).await, Verdict::Denied(None));
        assert!(matches!(
            verifier.verify(&addr(3)).await,
            Verdict::Unavailable(PortalError::NetworkError(_))
        ));
    }
}
