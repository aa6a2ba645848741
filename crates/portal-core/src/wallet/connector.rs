//! ============================================================================
//! Session Connector - Provider handle to authenticated wallet session
//! ============================================================================
//! Requests accounts, derives the chain, persists the session markers and
//! owns the single event subscription on the connected provider. Provider
//! events re-enter here first; the gate only reacts to the resulting
//! `SessionChange`.
//! ============================================================================

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::provider::{ProviderError, ProviderEvent, ProviderHandle, RpcMethod, WalletProvider};
use crate::db::{keys, KeyValueStore};
use crate::types::{Address, ChainId, PortalError, WalletSession};

/// What a provider event did to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// Active account moved to a different address
    Switched(WalletSession),
    /// Session torn down (empty account list or provider disconnect)
    Ended,
    /// Chain changed; the page context must be rebuilt from scratch
    ReloadRequired(ChainId),
    Unchanged,
}

pub struct SessionConnector {
    store: Arc<dyn KeyValueStore>,
    handle: ProviderHandle,
    session: Option<WalletSession>,
    events: Option<broadcast::Receiver<ProviderEvent>>,
}

impl SessionConnector {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            handle: ProviderHandle::None,
            session: None,
            events: None,
        }
    }

    pub fn session(&self) -> Option<&WalletSession> {
        self.session.as_ref()
    }

    /// Whether a provider event subscription is live
    pub fn is_listening(&self) -> bool {
        self.events.is_some()
    }

    /// Prompting connect. Fails with `ConnectionRejected` when the user
    /// declines or no account comes back.
    pub async fn connect(&mut self, handle: &ProviderHandle) -> Result<WalletSession, PortalError> {
        let provider = handle
            .provider()
            .ok_or_else(|| PortalError::ProviderUnavailable("install a Web3 wallet".into()))?
            .clone();

        info!("Requesting wallet accounts");
        let raw = provider
            .request(RpcMethod::RequestAccounts)
            .await
            .map_err(map_provider_error)?;
        let address = parse_accounts(&raw)?
            .into_iter()
            .next()
            .ok_or_else(|| PortalError::ConnectionRejected("No accounts found".into()))?;

        let chain_id = query_chain(provider.as_ref()).await?;
        Ok(self.establish(handle, address, chain_id))
    }

    /// Silent restore on page load. Never prompts; any failure means no session.
    pub async fn check_existing(&mut self, handle: &ProviderHandle) -> Option<WalletSession> {
        match self.store.get(keys::CONNECTED) {
            Ok(Some(marker)) if marker == "true" => {}
            Ok(_) => {
                debug!("No persisted session marker, skipping silent restore");
                return None;
            }
            Err(e) => {
                warn!("Failed to read session marker: {}", e);
                return None;
            }
        }

        let provider = handle.provider()?.clone();
        let accounts = match provider.request(RpcMethod::Accounts).await {
            Ok(raw) => match parse_accounts(&raw) {
                Ok(accounts) => accounts,
                Err(e) => {
                    warn!("Ignoring malformed account list: {}", e);
                    return None;
                }
            },
            Err(e) => {
                warn!("Silent account query failed: {}", e);
                return None;
            }
        };

        let Some(address) = accounts.into_iter().next() else {
            info!("Wallet no longer exposes an account, clearing session markers");
            self.clear_markers();
            return None;
        };

        match query_chain(provider.as_ref()).await {
            Ok(chain_id) => {
                info!("Restored wallet session for {}", address);
                Some(self.establish(handle, address, chain_id))
            }
            Err(e) => {
                warn!("Could not read chain during restore: {}", e);
                None
            }
        }
    }

    /// Clear the session, the persisted markers and the event subscription
    pub fn disconnect(&mut self) {
        if let Some(session) = &self.session {
            info!("Disconnecting wallet {}", session.address);
        }
        self.forget();
        self.clear_markers();
    }

    /// Drop in-memory state only; persisted markers survive (page reload)
    pub fn forget(&mut self) {
        self.session = None;
        self.events = None;
        self.handle = ProviderHandle::None;
    }

    /// Re-derive or tear down the session in response to a provider event
    pub fn on_event(&mut self, event: ProviderEvent) -> SessionChange {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let Some(next) = accounts.into_iter().next() else {
                    info!("Account list emptied, ending session");
                    self.disconnect();
                    return SessionChange::Ended;
                };
                let Some(session) = self.session.as_mut() else {
                    debug!("Account change with no session, ignoring");
                    return SessionChange::Unchanged;
                };
                if session.address == next {
                    return SessionChange::Unchanged;
                }

                info!("Active account changed {} -> {}", session.address, next);
                session.address = next;
                let session = session.clone();
                if let Err(e) = self.store.set(keys::ACCOUNT, session.address.as_str()) {
                    warn!("Failed to persist account marker: {}", e);
                }
                SessionChange::Switched(session)
            }
            ProviderEvent::ChainChanged(chain_id) => {
                info!("Chain changed to {}, reload required", chain_id);
                if let Some(session) = self.session.as_mut() {
                    session.chain_id = chain_id;
                }
                SessionChange::ReloadRequired(chain_id)
            }
            ProviderEvent::Disconnected => {
                info!("Provider disconnected");
                self.disconnect();
                SessionChange::Ended
            }
        }
    }

    /// Next provider event. Returns `None` when there is no subscription.
    pub async fn next_event(&mut self) -> Option<ProviderEvent> {
        let events = self.events.as_mut()?;
        loop {
            match events.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} provider events", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Provider event channel closed");
                    self.events = None;
                    return None;
                }
            }
        }
    }

    fn establish(&mut self, handle: &ProviderHandle, address: Address, chain_id: ChainId) -> WalletSession {
        let session = WalletSession {
            address,
            chain_id,
            provider_kind: handle.kind(),
        };

        if let Err(e) = self
            .store
            .set(keys::CONNECTED, "true")
            .and_then(|_| self.store.set(keys::ACCOUNT, session.address.as_str()))
        {
            warn!("Failed to persist session markers: {}", e);
        }

        // One subscription per connected provider
        if self.events.is_none() || !self.handle.same_provider(handle) {
            if let Some(provider) = handle.provider() {
                self.events = Some(provider.subscribe());
                debug!("Subscribed to provider events");
            }
        }
        self.handle = handle.clone();
        self.session = Some(session.clone());

        info!(
            "Wallet session established: {} on chain {} ({:?})",
            session.address, session.chain_id, session.provider_kind
        );
        session
    }

    fn clear_markers(&self) {
        for key in [keys::CONNECTED, keys::ACCOUNT] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to clear '{}': {}", key, e);
            }
        }
    }
}

fn map_provider_error(err: ProviderError) -> PortalError {
    if err.is_user_rejection() {
        PortalError::ConnectionRejected(err.message)
    } else {
        PortalError::ProviderUnavailable(err.to_string())
    }
}

fn parse_accounts(raw: &Value) -> Result<Vec<Address>, PortalError> {
    let list = raw
        .as_array()
        .ok_or_else(|| PortalError::ProviderUnavailable(format!("unexpected account list: {}", raw)))?;
    list.iter()
        .map(|entry| {
            entry
                .as_str()
                .ok_or_else(|| PortalError::InvalidAddress(entry.to_string()))
                .and_then(Address::parse)
        })
        .collect()
}

async fn query_chain(provider: &dyn WalletProvider) -> Result<ChainId, PortalError> {
    let raw = provider
        .request(RpcMethod::ChainId)
        .await
        .map_err(map_provider_error)?;
    match &raw {
        Value::String(s) => ChainId::parse(s),
        Value::Number(n) => n
            .as_u64()
            .map(ChainId)
            .ok_or_else(|| PortalError::InvalidChainId(raw.to_string())),
        _ => Err(PortalError::InvalidChainId(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::types::ProviderKind;
    use crate::wallet::static_provider::StaticProvider;
    use serde_json::json;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn setup(provider: StaticProvider) -> (SessionConnector, Arc<StaticProvider>, ProviderHandle, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(provider);
        let handle = ProviderHandle::Injected(provider.clone());
        (SessionConnector::new(store.clone()), provider, handle, store)
    }

    #[tokio::test]
    async fn test_connect_persists_markers() {
        let (mut connector, provider, handle, store) =
            setup(StaticProvider::new(vec![addr(1), addr(2)], ChainId(695569)));

        let session = connector.connect(&handle).await.unwrap();
        assert_eq!(session.address, addr(1));
        assert_eq!(session.chain_id, ChainId(695569));
        assert_eq!(session.provider_kind, ProviderKind::Injected);

        assert_eq!(store.get(keys::CONNECTED).unwrap().as_deref(), Some("true"));
        assert_eq!(store.get(keys::ACCOUNT).unwrap(), Some(addr(1).to_string()));
        assert_eq!(provider.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejected_by_user() {
        let (mut connector, _, handle, store) =
            setup(StaticProvider::new(vec![addr(1)], ChainId(1)).rejecting());

        let err = connector.connect(&handle).await.unwrap_err();
        assert!(matches!(err, PortalError::ConnectionRejected(_)));
        assert!(connector.session().is_none());
        assert_eq!(store.get(keys::CONNECTED).unwrap(), None);
    }

    #[tokio::test]
    async fn test_connect_without_accounts_is_rejection() {
        let (mut connector, _, handle, _) = setup(StaticProvider::new(vec![], ChainId(1)));
        let err = connector.connect(&handle).await.unwrap_err();
        assert!(matches!(err, PortalError::ConnectionRejected(_)));
    }

    #[tokio::test]
    async fn test_connect_without_provider() {
        let store = Arc::new(MemoryStore::new());
        let mut connector = SessionConnector::new(store);
        let err = connector.connect(&ProviderHandle::None).await.unwrap_err();
        assert!(matches!(err, PortalError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_repeated_connects_keep_one_subscription() {
        let (mut connector, provider, handle, _) = setup(StaticProvider::new(vec![addr(1)], ChainId(1)));
        connector.connect(&handle).await.unwrap();
        connector.connect(&handle).await.unwrap();
        assert_eq!(provider.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_check_existing_requires_marker() {
        let (mut connector, provider, handle, store) =
            setup(StaticProvider::new(vec![addr(1)], ChainId(1)).authorized());

        assert!(connector.check_existing(&handle).await.is_none());

        store.set(keys::CONNECTED, "true").unwrap();
        let session = connector.check_existing(&handle).await.unwrap();
        assert_eq!(session.address, addr(1));
        assert_eq!(provider.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_check_existing_clears_stale_markers() {
        let (mut connector, _, handle, store) = setup(StaticProvider::new(vec![addr(1)], ChainId(1)));
        store.set(keys::CONNECTED, "true").unwrap();
        store.set(keys::ACCOUNT, addr(1).as_str()).unwrap();

        // Not authorized: silent query returns no accounts
        assert!(connector.check_existing(&handle).await.is_none());
        assert_eq!(store.get(keys::CONNECTED).unwrap(), None);
        assert_eq!(store.get(keys::ACCOUNT).unwrap(), None);
    }

    #[tokio::test]
    async fn test_account_events() {
        let (mut connector, provider, handle, store) = setup(StaticProvider::new(vec![addr(1)], ChainId(1)));
        connector.connect(&handle).await.unwrap();

        assert_eq!(
            connector.on_event(ProviderEvent::AccountsChanged(vec![addr(1)])),
            SessionChange::Unchanged
        );

        match connector.on_event(ProviderEvent::AccountsChanged(vec![addr(2)])) {
            SessionChange::Switched(session) => assert_eq!(session.address, addr(2)),
            other => panic!("unexpected change: {:?}", other),
        }
        assert_eq!(store.get(keys::ACCOUNT).unwrap(), Some(addr(2).to_string()));

        assert_eq!(connector.on_event(ProviderEvent::AccountsChanged(vec![])), SessionChange::Ended);
        assert!(connector.session().is_none());
        assert!(!connector.is_listening());
        assert_eq!(provider.listener_count(), 0);
        assert_eq!(store.get(keys::CONNECTED).unwrap(), None);
    }

    #[tokio::test]
    async fn test_chain_change_requires_reload() {
        let (mut connector, _, handle, _) = setup(StaticProvider::new(vec![addr(1)], ChainId(1)));
        connector.connect(&handle).await.unwrap();
        assert_eq!(
            connector.on_event(ProviderEvent::ChainChanged(ChainId(5))),
            SessionChange::ReloadRequired(ChainId(5))
        );
    }

    #[tokio::test]
    async fn test_next_event_reads_subscription() {
        let (mut connector, provider, handle, _) = setup(StaticProvider::new(vec![addr(1)], ChainId(1)));
        assert!(connector.next_event().await.is_none());

        connector.connect(&handle).await.unwrap();
        provider.disconnect();
        assert_eq!(connector.next_event().await, Some(ProviderEvent::Disconnected));
    }

    #[test]
    fn test_parse_accounts() {
        let parsed = parse_accounts(&json!([addr(3).as_str()])).unwrap();
        assert_eq!(parsed, vec![addr(3)]);
        assert!(parse_accounts(&json!("0x01")).is_err());
        assert!(parse_accounts(&json!([42])).is_err());
    }
}
