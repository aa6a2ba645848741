//! ============================================================================
//! Static Provider - Headless wallet stand-in
//! ============================================================================
//! A wallet provider with a fixed account list, used by the CLI to drive the
//! gate without a browser and by tests to script wallet behavior.
//! ============================================================================

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::provider::{
    ProviderAnnouncement, ProviderError, ProviderEvent, ProviderHost, ProviderInfo, RpcMethod,
    WalletProvider,
};
use crate::types::{Address, ChainId};

const EVENT_CAPACITY: usize = 16;

/// Wallet provider backed by a fixed, scriptable account list
pub struct StaticProvider {
    accounts: Mutex<Vec<Address>>,
    chain_id: Mutex<ChainId>,
    /// Whether the site already holds account permission
    authorized: AtomicBool,
    reject_requests: AtomicBool,
    prompts: AtomicUsize,
    events: broadcast::Sender<ProviderEvent>,
}

impl StaticProvider {
    pub fn new(accounts: Vec<Address>, chain_id: ChainId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            accounts: Mutex::new(accounts),
            chain_id: Mutex::new(chain_id),
            authorized: AtomicBool::new(false),
            reject_requests: AtomicBool::new(false),
            prompts: AtomicUsize::new(0),
            events,
        }
    }

    /// Account permission was granted in an earlier page load
    pub fn authorized(self) -> Self {
        self.authorized.store(true, Ordering::SeqCst);
        self
    }

    /// Every prompting request is declined by the user
    pub fn rejecting(self) -> Self {
        self.reject_requests.store(true, Ordering::SeqCst);
        self
    }

    /// Number of prompting account requests seen
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Number of live event subscriptions
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Change the active account list and notify listeners
    pub fn switch_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock().unwrap_or_else(|e| e.into_inner()) = accounts.clone();
        self.emit(ProviderEvent::AccountsChanged(accounts));
    }

    pub fn switch_chain(&self, chain_id: ChainId) {
        *self.chain_id.lock().unwrap_or_else(|e| e.into_inner()) = chain_id;
        self.emit(ProviderEvent::ChainChanged(chain_id));
    }

    /// Wallet dropped its connection; permission is lost
    pub fn disconnect(&self) {
        self.authorized.store(false, Ordering::SeqCst);
        self.emit(ProviderEvent::Disconnected);
    }

    fn emit(&self, event: ProviderEvent) {
        debug!("Static provider emitting {:?}", event);
        // No receivers is fine: nobody is connected yet
        let _ = self.events.send(event);
    }

    fn account_list(&self) -> Value {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        json!(accounts.iter().map(|a| a.as_str()).collect::<Vec<_>>())
    }
}

#[async_trait]
impl WalletProvider for StaticProvider {
    async fn request(&self, method: RpcMethod) -> Result<Value, ProviderError> {
        debug!("Static provider request: {}", method.as_str());
        match method {
            RpcMethod::Accounts => {
                if self.authorized.load(Ordering::SeqCst) {
                    Ok(self.account_list())
                } else {
                    Ok(json!([]))
                }
            }
            RpcMethod::RequestAccounts => {
                self.prompts.fetch_add(1, Ordering::SeqCst);
                if self.reject_requests.load(Ordering::SeqCst) {
                    return Err(ProviderError::user_rejected());
                }
                self.authorized.store(true, Ordering::SeqCst);
                Ok(self.account_list())
            }
            RpcMethod::ChainId => {
                let chain_id = *self.chain_id.lock().unwrap_or_else(|e| e.into_inner());
                Ok(json!(chain_id.to_hex()))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// Provider host with a fixed set of injected and announcing wallets
#[derive(Default)]
pub struct StaticHost {
    injected: Option<Arc<dyn WalletProvider>>,
    announced: Vec<ProviderAnnouncement>,
    announce_delay: Duration,
    listeners: Mutex<Vec<mpsc::UnboundedSender<ProviderAnnouncement>>>,
}

impl StaticHost {
    /// A host with no wallet installed
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_injected(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.injected = Some(provider);
        self
    }

    pub fn with_announced(mut self, info: ProviderInfo, provider: Arc<dyn WalletProvider>) -> Self {
        self.announced.push(ProviderAnnouncement { info, provider });
        self
    }

    /// Delay before each announcement answers a discovery request
    pub fn with_announce_delay(mut self, delay: Duration) -> Self {
        self.announce_delay = delay;
        self
    }

    /// Number of registered announcement listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ProviderHost for StaticHost {
    fn injected(&self) -> Option<Arc<dyn WalletProvider>> {
        self.injected.clone()
    }

    fn listen_announcements(&self) -> mpsc::UnboundedReceiver<ProviderAnnouncement> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        rx
    }

    fn request_providers(&self) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for announcement in &self.announced {
            for tx in &listeners {
                let tx = tx.clone();
                let announcement = announcement.clone();
                let delay = self.announce_delay;
                if delay.is_zero() {
                    let _ = tx.send(announcement);
                } else {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(announcement);
                    });
                }
            }
        }
    }
}
