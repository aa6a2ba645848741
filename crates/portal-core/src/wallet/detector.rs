//! ============================================================================
//! Provider Detector - Find the wallet to use
//! ============================================================================
//! Injected provider first; otherwise ask installed wallets to announce
//! themselves and wait a bounded window for a matching answer.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use super::provider::{ProviderAnnouncement, ProviderHandle, ProviderHost};

pub struct ProviderDetector {
    host: Arc<dyn ProviderHost>,
    wait: Duration,
    preferred: Vec<String>,
    /// Registered once, kept for the detector's lifetime
    announcements: Option<mpsc::UnboundedReceiver<ProviderAnnouncement>>,
    detected: Option<ProviderHandle>,
}

impl ProviderDetector {
    pub fn new(host: Arc<dyn ProviderHost>, wait: Duration, preferred: Vec<String>) -> Self {
        Self {
            host,
            wait,
            preferred,
            announcements: None,
            detected: None,
        }
    }

    /// Detect the provider to use. Never waits longer than the announce window.
    ///
    /// A found provider is cached, so repeated calls return the same handle
    /// without re-broadcasting. `ProviderHandle::None` is not cached: a wallet
    /// installed later is picked up by the next call.
    pub async fn detect(&mut self) -> ProviderHandle {
        if let Some(handle) = &self.detected {
            debug!("Provider already detected: {:?}", handle);
            return handle.clone();
        }

        if let Some(provider) = self.host.injected() {
            info!("Injected wallet provider detected");
            let handle = ProviderHandle::Injected(provider);
            self.detected = Some(handle.clone());
            return handle;
        }

        let host = &self.host;
        let receiver = self
            .announcements
            .get_or_insert_with(|| host.listen_announcements());

        debug!("No injected provider, requesting announcements ({:?} window)", self.wait);
        self.host.request_providers();

        let deadline = Instant::now() + self.wait;
        let mut found = None;
        loop {
            match timeout_at(deadline, receiver.recv()).await {
                Ok(Some(announcement)) => {
                    let wanted = self.preferred.is_empty()
                        || self.preferred.iter().any(|name| announcement.info.matches(name));
                    if wanted {
                        found = Some(announcement);
                        break;
                    }
                    debug!("Ignoring announced provider '{}'", announcement.info.name);
                }
                Ok(None) => {
                    debug!("Announcement channel closed");
                    break;
                }
                Err(_) => break,
            }
        }

        match found {
            Some(ProviderAnnouncement { info, provider }) => {
                info!("Announced wallet provider detected: {} ({})", info.name, info.rdns);
                let handle = ProviderHandle::Announced { provider, info };
                self.detected = Some(handle.clone());
                handle
            }
            None => {
                info!("No wallet provider found");
                ProviderHandle::None
            }
        }
    }
}
