//! ============================================================================
//! Access Gate - Wallet session + tribe verification state machine
//! ============================================================================
//! Owns the single authoritative `AccessState` for a page lifetime:
//!
//! ```text
//! Unconnected ──connect──▶ Connecting ──▶ Granted | Denied | Error
//! Granted ──accountsChanged──▶ Connecting (re-verify)
//! Granted | Denied | Error ──disconnect──▶ Unconnected
//! any ──chainChanged──▶ reload (reset + silent restore)
//! ```
//!
//! Protected content is exposed only while the state is `Granted`.
//! ============================================================================

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::checker::{MembershipSource, TribeVerifier, Verdict};
use super::types::{AccessState, MembershipRecord, PortalProfile, StateTransition};
use super::view::GateView;
use crate::admin::AdminRegistry;
use crate::config::PortalConfig;
use crate::db::{keys, KeyValueStore, StoreExt};
use crate::types::{ChainId, PortalError, WalletSession};
use crate::wallet::{ProviderDetector, ProviderEvent, ProviderHost, SessionChange, SessionConnector};

const TRANSITION_CAPACITY: usize = 32;

/// User-initiated actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCommand {
    Connect,
    Disconnect,
    Restore,
}

/// What the gate did with a provider event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReaction {
    Ignored,
    Reverified,
    TornDown,
    Reloaded,
}

pub struct AccessGate {
    detector: ProviderDetector,
    connector: SessionConnector,
    verifier: TribeVerifier,
    admin: AdminRegistry,
    store: Arc<dyn KeyValueStore>,
    state: AccessState,
    /// Set together with `Granted`, cleared on every other transition path
    membership: Option<MembershipRecord>,
    provider_missing: bool,
    expected_chain_id: Option<ChainId>,
    help_url: String,
    transitions: broadcast::Sender<StateTransition>,
}

impl AccessGate {
    pub fn new(
        config: &PortalConfig,
        host: Arc<dyn ProviderHost>,
        source: Arc<dyn MembershipSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            detector: ProviderDetector::new(host, config.announce_wait(), config.preferred_wallets.clone()),
            connector: SessionConnector::new(store.clone()),
            verifier: TribeVerifier::new(source, config.required_tribe_id),
            admin: AdminRegistry::new(store.clone(), config.admin_wallets.clone()),
            store,
            state: AccessState::Unconnected,
            membership: None,
            provider_missing: false,
            expected_chain_id: config.expected_chain_id,
            help_url: config.help_url.clone(),
            transitions,
        }
    }

    pub fn state(&self) -> &AccessState {
        &self.state
    }

    pub fn session(&self) -> Option<&WalletSession> {
        self.connector.session()
    }

    pub fn admin(&self) -> &AdminRegistry {
        &self.admin
    }

    pub fn verifier(&self) -> &TribeVerifier {
        &self.verifier
    }

    /// Every state change, in order
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// The verified membership, only while access is granted
    pub fn protected_content(&self) -> Option<&MembershipRecord> {
        if self.state.is_granted() {
            self.membership.as_ref()
        } else {
            None
        }
    }

    /// Connect is offered from `Unconnected` and `Error` when a wallet exists
    pub fn connect_enabled(&self) -> bool {
        !self.provider_missing && matches!(self.state, AccessState::Unconnected | AccessState::Error(_))
    }

    /// Admin status for the granted session. Tribe access comes first.
    pub fn is_admin(&self) -> bool {
        if !self.state.is_granted() {
            return false;
        }
        let Some(session) = self.session() else {
            return false;
        };
        match self.admin.is_approved(&session.address) {
            Ok(approved) => approved,
            Err(e) => {
                warn!("Admin lookup failed: {}", e);
                false
            }
        }
    }

    pub fn wrong_network(&self) -> bool {
        match (self.expected_chain_id, self.session()) {
            (Some(expected), Some(session)) => session.chain_id != expected,
            _ => false,
        }
    }

    /// Last cached membership, if it belongs to the current session
    pub fn cached_membership(&self) -> Option<MembershipRecord> {
        let session = self.session()?;
        match self.store.get_json::<MembershipRecord>(keys::MEMBERSHIP) {
            Ok(Some(record)) if record.holder_address == session.address => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring unreadable cached membership: {}", e);
                None
            }
        }
    }

    pub fn view(&self) -> GateView {
        match &self.state {
            AccessState::Unconnected => GateView::WalletRequired {
                install_wallet: self.provider_missing,
                connect_enabled: self.connect_enabled(),
            },
            AccessState::Connecting => GateView::Connecting {
                preview: self
                    .cached_membership()
                    .map(|record| PortalProfile::new(&record, self.session())),
            },
            AccessState::Denied => GateView::AccessDenied {
                short_address: self.session().map(|s| s.address.short()),
                help_url: self.help_url.clone(),
            },
            AccessState::Granted => match &self.membership {
                Some(record) => {
                    let mut profile = PortalProfile::new(record, self.session());
                    profile.is_admin = self.is_admin();
                    profile.wrong_network = self.wrong_network();
                    GateView::Unlocked(profile)
                }
                None => GateView::Failed {
                    message: "Membership record unavailable".to_string(),
                    install_wallet: false,
                    connect_enabled: false,
                },
            },
            AccessState::Error(err) => GateView::Failed {
                message: err.to_string(),
                install_wallet: self.provider_missing,
                connect_enabled: self.connect_enabled(),
            },
        }
    }

    /// User clicked connect: detect, connect, verify
    pub async fn connect(&mut self) -> &AccessState {
        if !self.connect_enabled() {
            debug!("Connect ignored while {}", self.state.label());
            return &self.state;
        }

        self.transition(AccessState::Connecting);

        let handle = self.detector.detect().await;
        if !handle.is_available() {
            self.provider_missing = true;
            self.transition(AccessState::Error(PortalError::ProviderUnavailable(
                "install a Web3 wallet to continue".into(),
            )));
            return &self.state;
        }

        match self.connector.connect(&handle).await {
            Ok(session) => self.verify_session(session).await,
            Err(e) => {
                warn!("Wallet connection failed: {}", e);
                self.transition(AccessState::Error(e));
            }
        }
        &self.state
    }

    /// Page-load path: silently reuse a previously granted wallet session
    pub async fn restore(&mut self) -> &AccessState {
        if self.state != AccessState::Unconnected {
            debug!("Restore skipped while {}", self.state.label());
            return &self.state;
        }

        let handle = self.detector.detect().await;
        if !handle.is_available() {
            self.provider_missing = true;
            return &self.state;
        }
        self.provider_missing = false;

        if let Some(session) = self.connector.check_existing(&handle).await {
            self.verify_session(session).await;
        }
        &self.state
    }

    /// Rebuild the page context from scratch; persisted markers survive
    pub async fn reload(&mut self) -> &AccessState {
        info!("Reloading portal context");
        self.connector.forget();
        self.membership = None;
        self.transition(AccessState::Unconnected);
        self.restore().await
    }

    /// Clear the session and cached membership
    pub fn disconnect(&mut self) {
        self.connector.disconnect();
        self.membership = None;
        self.clear_cached_membership();
        self.transition(AccessState::Unconnected);
    }

    /// Next event from the connected provider, `None` when not listening
    pub async fn next_event(&mut self) -> Option<ProviderEvent> {
        self.connector.next_event().await
    }

    pub async fn handle_event(&mut self, event: ProviderEvent) -> GateReaction {
        debug!("Provider event: {:?}", event);
        match self.connector.on_event(event) {
            SessionChange::Unchanged => GateReaction::Ignored,
            SessionChange::Ended => {
                self.membership = None;
                self.clear_cached_membership();
                self.transition(AccessState::Unconnected);
                GateReaction::TornDown
            }
            SessionChange::Switched(session) => {
                self.verify_session(session).await;
                GateReaction::Reverified
            }
            SessionChange::ReloadRequired(_) => {
                self.reload().await;
                GateReaction::Reloaded
            }
        }
    }

    /// Serve commands and provider events one at a time until the
    /// command channel closes
    pub async fn run(&mut self, mut commands: mpsc::Receiver<GateCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(GateCommand::Connect) => {
                        self.connect().await;
                    }
                    Some(GateCommand::Disconnect) => self.disconnect(),
                    Some(GateCommand::Restore) => {
                        self.restore().await;
                    }
                    None => {
                        debug!("Gate command channel closed");
                        break;
                    }
                },
                Some(event) = self.connector.next_event() => {
                    self.handle_event(event).await;
                }
            }
        }
    }

    async fn verify_session(&mut self, session: WalletSession) {
        self.membership = None;
        self.transition(AccessState::Connecting);

        if let Some(expected) = self.expected_chain_id {
            if session.chain_id != expected {
                warn!(
                    "Wallet {} is on chain {} (expected {})",
                    session.address, session.chain_id, expected
                );
            }
        }

        match self.verifier.verify(&session.address).await {
            Verdict::Granted(record) => {
                if let Err(e) = self.store.set_json(keys::MEMBERSHIP, &record) {
                    warn!("Failed to cache membership: {}", e);
                }
                self.membership = Some(record);
                self.transition(AccessState::Granted);
            }
            Verdict::Denied(_) => {
                self.clear_cached_membership();
                self.transition(AccessState::Denied);
            }
            Verdict::Unavailable(e) => {
                self.transition(AccessState::Error(e));
            }
        }
    }

    fn transition(&mut self, next: AccessState) {
        if self.state == next {
            return;
        }
        let from = std::mem::replace(&mut self.state, next.clone());
        info!("Access state: {} -> {}", from.label(), next.label());
        let _ = self.transitions.send(StateTransition { from, to: next });
    }

    fn clear_cached_membership(&self) {
        if let Err(e) = self.store.remove(keys::MEMBERSHIP) {
            warn!("Failed to clear cached membership: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::checker::fakes::FakeMembership;
    use crate::access::view::GateView;
    use crate::db::MemoryStore;
    use crate::types::Address;
    use crate::wallet::{StaticHost, StaticProvider};
    use proptest::prelude::*;
    use std::time::Duration;

    const TRIBE: u64 = 98000063;
    const GAME_CHAIN: ChainId = ChainId(695569);

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn config() -> PortalConfig {
        PortalConfig {
            world_api_base: "http://127.0.0.1:1/v2".into(),
            required_tribe_id: TRIBE,
            announce_wait_ms: 50,
            preferred_wallets: vec![],
            expected_chain_id: Some(GAME_CHAIN),
            help_url: "https://discord.gg/help".into(),
            admin_wallets: vec![addr(0xaa)],
            db_path: None,
            http_timeout_secs: 1,
        }
    }

    struct Harness {
        gate: AccessGate,
        provider: Arc<StaticProvider>,
        store: Arc<MemoryStore>,
        source: Arc<FakeMembership>,
        transitions: broadcast::Receiver<StateTransition>,
    }

    impl Harness {
        fn new(provider: StaticProvider, source: FakeMembership) -> Self {
            let provider = Arc::new(provider);
            let host = Arc::new(StaticHost::empty().with_injected(provider.clone()));
            Self::with_host(host, provider, Arc::new(MemoryStore::new()), Arc::new(source))
        }

        fn with_host(
            host: Arc<StaticHost>,
            provider: Arc<StaticProvider>,
            store: Arc<MemoryStore>,
            source: Arc<FakeMembership>,
        ) -> Self {
            let gate = AccessGate::new(&config(), host, source.clone(), store.clone());
            let transitions = gate.subscribe_transitions();
            Self {
                gate,
                provider,
                store,
                source,
                transitions,
            }
        }

        /// Same store and wallet, fresh gate: a page reload
        fn reloaded(&self) -> Self {
            let host = Arc::new(StaticHost::empty().with_injected(self.provider.clone()));
            Self::with_host(host, self.provider.clone(), self.store.clone(), self.source.clone())
        }

        fn taken_transitions(&mut self) -> Vec<(&'static str, &'static str)> {
            let mut seen = Vec::new();
            while let Ok(t) = self.transitions.try_recv() {
                seen.push((t.from.label(), t.to.label()));
            }
            seen
        }
    }

    fn members() -> FakeMembership {
        FakeMembership::default()
            .member(&addr(1), TRIBE, "Vex")
            .member(&addr(2), 12345, "Outsider")
            .member(&addr(0xaa), TRIBE, "Founder")
    }

    fn wallet(account: Address) -> StaticProvider {
        StaticProvider::new(vec![account], GAME_CHAIN)
    }

    #[tokio::test]
    async fn test_scenario_a_no_provider() {
        let host = Arc::new(StaticHost::empty());
        let provider = Arc::new(wallet(addr(1)));
        let mut h = Harness::with_host(host, provider, Arc::new(MemoryStore::new()), Arc::new(members()));

        let state = h.gate.connect().await.clone();
        assert!(matches!(state, AccessState::Error(PortalError::ProviderUnavailable(_))));
        assert_eq!(
            h.taken_transitions(),
            vec![("unconnected", "connecting"), ("connecting", "error")]
        );

        match h.gate.view() {
            GateView::Failed {
                install_wallet,
                connect_enabled,
                ..
            } => {
                assert!(install_wallet);
                assert!(!connect_enabled);
            }
            other => panic!("unexpected view: {:?}", other),
        }

        // Control disabled: a second click does nothing
        h.gate.connect().await;
        assert!(h.taken_transitions().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_b_member_granted() {
        let mut h = Harness::new(wallet(addr(1)), members());

        assert_eq!(*h.gate.connect().await, AccessState::Granted);
        assert_eq!(
            h.taken_transitions(),
            vec![("unconnected", "connecting"), ("connecting", "granted")]
        );

        let content = h.gate.protected_content().unwrap();
        assert_eq!(content.display_name, "Vex");

        let view = h.gate.view();
        assert!(view.shows_protected_content());
        match view {
            GateView::Unlocked(profile) => {
                assert_eq!(profile.name, "Vex");
                assert_eq!(profile.short_address, addr(1).short());
                assert!(!profile.is_admin);
                assert!(!profile.wrong_network);
            }
            other => panic!("unexpected view: {:?}", other),
        }

        let cached: MembershipRecord = h.store.get_json(keys::MEMBERSHIP).unwrap().unwrap();
        assert_eq!(cached.holder_address, addr(1));
    }

    #[tokio::test]
    async fn test_scenario_c_wrong_tribe_denied() {
        let mut h = Harness::new(wallet(addr(2)), members());

        assert_eq!(*h.gate.connect().await, AccessState::Denied);
        assert_eq!(
            h.taken_transitions(),
            vec![("unconnected", "connecting"), ("connecting", "denied")]
        );
        assert!(h.gate.protected_content().is_none());
        assert!(matches!(
            h.gate.view(),
            GateView::AccessDenied { ref help_url, .. } if help_url == "https://discord.gg/help"
        ));
        assert!(!h.gate.connect_enabled());
        assert_eq!(h.store.get(keys::MEMBERSHIP).unwrap(), None);
    }

    #[tokio::test]
    async fn test_denied_requires_disconnect_before_retry() {
        let mut h = Harness::new(wallet(addr(2)), members());
        h.gate.connect().await;
        let lookups = h.source.lookups();

        assert_eq!(*h.gate.connect().await, AccessState::Denied);
        assert_eq!(h.source.lookups(), lookups);

        h.gate.disconnect();
        assert!(h.gate.connect_enabled());
    }

    #[tokio::test]
    async fn test_scenario_d_account_switch_to_non_member() {
        let mut h = Harness::new(wallet(addr(1)), members());
        h.gate.connect().await;
        h.taken_transitions();

        h.provider.switch_accounts(vec![addr(2)]);
        let event = h.gate.next_event().await.unwrap();
        assert_eq!(h.gate.handle_event(event).await, GateReaction::Reverified);

        assert_eq!(*h.gate.state(), AccessState::Denied);
        assert_eq!(
            h.taken_transitions(),
            vec![("granted", "connecting"), ("connecting", "denied")]
        );
        assert_eq!(h.gate.session().unwrap().address, addr(2));
        assert!(h.gate.protected_content().is_none());
    }

    #[tokio::test]
    async fn test_scenario_e_provider_disconnect() {
        let mut h = Harness::new(wallet(addr(1)), members());
        h.gate.connect().await;

        h.provider.disconnect();
        let event = h.gate.next_event().await.unwrap();
        assert_eq!(h.gate.handle_event(event).await, GateReaction::TornDown);

        assert_eq!(*h.gate.state(), AccessState::Unconnected);
        assert!(h.gate.session().is_none());
        assert!(h.gate.protected_content().is_none());
        assert_eq!(h.store.get(keys::CONNECTED).unwrap(), None);
        assert_eq!(h.store.get(keys::ACCOUNT).unwrap(), None);
        assert_eq!(h.store.get(keys::MEMBERSHIP).unwrap(), None);
        assert_eq!(h.provider.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_reload_restores_without_prompt() {
        let mut h = Harness::new(wallet(addr(1)), members());
        h.gate.connect().await;
        assert_eq!(h.provider.prompt_count(), 1);

        let mut after = h.reloaded();
        drop(h);
        assert_eq!(*after.gate.restore().await, AccessState::Granted);
        assert_eq!(after.provider.prompt_count(), 1);
        assert_eq!(
            after.taken_transitions(),
            vec![("unconnected", "connecting"), ("connecting", "granted")]
        );
        // Re-validated against the live source, not trusted from cache
        assert_eq!(after.source.lookups(), 2);
    }

    #[tokio::test]
    async fn test_restore_revalidates_changed_membership() {
        let mut h = Harness::new(wallet(addr(1)), members());
        h.gate.connect().await;

        h.source.set_member(&addr(1), 777);
        let mut after = h.reloaded();
        assert_eq!(*after.gate.restore().await, AccessState::Denied);
    }

    #[tokio::test]
    async fn test_disconnect_survives_reload() {
        let mut h = Harness::new(wallet(addr(1)), members());
        h.gate.connect().await;
        h.gate.disconnect();

        let mut after = h.reloaded();
        assert_eq!(*after.gate.restore().await, AccessState::Unconnected);
        assert!(after.gate.connect_enabled());
    }

    #[tokio::test]
    async fn test_chain_change_reloads() {
        let mut h = Harness::new(wallet(addr(1)), members());
        h.gate.connect().await;
        h.taken_transitions();

        h.provider.switch_chain(ChainId(1));
        let event = h.gate.next_event().await.unwrap();
        assert_eq!(h.gate.handle_event(event).await, GateReaction::Reloaded);

        assert_eq!(*h.gate.state(), AccessState::Granted);
        assert_eq!(
            h.taken_transitions(),
            vec![
                ("granted", "unconnected"),
                ("unconnected", "connecting"),
                ("connecting", "granted")
            ]
        );
        assert_eq!(h.gate.session().unwrap().chain_id, ChainId(1));
        assert!(h.gate.wrong_network());
        assert_eq!(h.provider.listener_count(), 1);
        assert_eq!(h.provider.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_network_error_is_retryable() {
        let source = FakeMembership::default().failing(&addr(1), PortalError::NetworkError("HTTP 503".into()));
        let mut h = Harness::new(wallet(addr(1)), source);

        let state = h.gate.connect().await.clone();
        assert!(matches!(state, AccessState::Error(PortalError::NetworkError(_))));
        assert!(h.gate.connect_enabled());
        assert!(h.gate.protected_content().is_none());

        h.source.set_member(&addr(1), TRIBE);
        assert_eq!(*h.gate.connect().await, AccessState::Granted);
    }

    #[tokio::test]
    async fn test_rejected_connection_is_retryable() {
        let mut h = Harness::new(wallet(addr(1)).rejecting(), members());
        let state = h.gate.connect().await.clone();
        assert!(matches!(state, AccessState::Error(PortalError::ConnectionRejected(_))));
        assert!(h.gate.view().connect_enabled());
        assert!(h.gate.session().is_none());
    }

    #[tokio::test]
    async fn test_single_listener_across_reconnects() {
        let mut h = Harness::new(wallet(addr(1)), members());
        h.gate.connect().await;
        h.gate.disconnect();
        h.gate.connect().await;
        h.provider.switch_chain(ChainId(1));
        let event = h.gate.next_event().await.unwrap();
        h.gate.handle_event(event).await;
        assert_eq!(h.provider.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_admin_requires_tribe_access() {
        let mut h = Harness::new(wallet(addr(0xaa)), members());
        h.gate.connect().await;
        assert!(h.gate.is_admin());
        assert!(matches!(h.gate.view(), GateView::Unlocked(p) if p.is_admin));

        // Approved but outside the tribe: never admin
        let mut outsider = Harness::new(wallet(addr(2)), members());
        outsider.gate.admin().approve(addr(2).as_str(), None).unwrap();
        outsider.gate.connect().await;
        assert!(!outsider.gate.is_admin());
    }

    #[tokio::test]
    async fn test_cached_membership_matches_session() {
        let mut h = Harness::new(wallet(addr(1)), members());
        assert!(h.gate.cached_membership().is_none());
        h.gate.connect().await;
        assert_eq!(h.gate.cached_membership().unwrap().holder_address, addr(1));
    }

    #[tokio::test]
    async fn test_run_loop_serializes_commands_and_events() {
        let mut h = Harness::new(wallet(addr(1)), members());
        let (tx, rx) = mpsc::channel(8);
        let provider = h.provider.clone();

        tx.send(GateCommand::Connect).await.unwrap();
        tx.send(GateCommand::Connect).await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            provider.switch_accounts(vec![addr(2)]);
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(tx);
        });

        h.gate.run(rx).await;

        assert_eq!(*h.gate.state(), AccessState::Denied);
        assert_eq!(
            h.taken_transitions(),
            vec![
                ("unconnected", "connecting"),
                ("connecting", "granted"),
                ("granted", "connecting"),
                ("connecting", "denied")
            ]
        );
        assert_eq!(h.provider.prompt_count(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_empty_account_list_ends_session(picks in proptest::collection::vec(0u8..4, 0..8)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let mut h = Harness::new(wallet(addr(1)), members());
                h.gate.connect().await;

                for pick in picks {
                    let accounts = if pick == 0 { vec![] } else { vec![addr(pick)] };
                    h.gate.handle_event(ProviderEvent::AccountsChanged(accounts)).await;
                }
                h.gate.handle_event(ProviderEvent::AccountsChanged(vec![])).await;

                assert_eq!(*h.gate.state(), AccessState::Unconnected);
                assert!(h.gate.session().is_none());
                assert!(h.gate.protected_content().is_none());
            });
        }
    }
}
