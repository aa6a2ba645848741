//! ============================================================================
//! World API Client - Character and tribe lookups
//! ============================================================================
//! Read-only client for the game world API:
//! - GET /smartcharacters/{address}: character name, portrait, tribe id
//! - GET /tribes/{id}: tribe name and member list
//! Best-effort, single attempt per call.
//! ============================================================================

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::access::{
    MembershipRecord, MembershipSource, TribeMember, TribeRoster, DEFAULT_PORTRAIT_URL, UNKNOWN_CHARACTER,
};
use crate::types::{Address, PortalError};

/// Client for the world API
pub struct WorldApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl WorldApiClient {
    /// Create a client for the given API base (e.g. `https://host/v2`)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PortalError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| PortalError::NetworkError(format!("Invalid world API URL '{}': {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PortalError::NetworkError(format!(
                "Unsupported world API scheme: {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortalError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base}/{path}?format=json`. 404 maps to `not_found`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        not_found: impl FnOnce() -> PortalError,
    ) -> Result<T, PortalError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("format", "json")])
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| PortalError::NetworkError(format!("Failed to reach world API: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }

        let body = response
            .text()
            .await
            .map_err(|e| PortalError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            warn!("World API error {} for {}", status, url);
            return Err(PortalError::NetworkError(format!("World API error {}: {}", status, body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| PortalError::NetworkError(format!("Failed to parse world API response: {}", e)))
    }
}

#[async_trait]
impl MembershipSource for WorldApiClient {
    async fn smart_character(&self, address: &Address) -> Result<MembershipRecord, PortalError> {
        let payload: SmartCharacterResponse = self
            .get_json(&format!("smartcharacters/{}", address), || {
                PortalError::NotFound(address.to_string())
            })
            .await?;
        payload.into_record(address)
    }

    async fn tribe(&self, tribe_id: u64) -> Result<TribeRoster, PortalError> {
        let payload: TribeResponse = self
            .get_json(&format!("tribes/{}", tribe_id), || {
                PortalError::NotFound(format!("tribe {}", tribe_id))
            })
            .await?;
        Ok(payload.into_roster(tribe_id))
    }
}

// ============================================================================
// World API Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartCharacterResponse {
    address: Option<String>,
    name: Option<String>,
    tribe_id: Option<u64>,
    portrait_url: Option<String>,
}

impl SmartCharacterResponse {
    fn into_record(self, requested: &Address) -> Result<MembershipRecord, PortalError> {
        // Tribe id 0 is how the API reports "no tribe"
        let group_id = match self.tribe_id {
            Some(id) if id != 0 => id,
            _ => return Err(PortalError::NotFound(requested.to_string())),
        };

        let holder_address = match self.address.as_deref().map(Address::parse) {
            Some(Ok(addr)) => addr,
            _ => requested.clone(),
        };

        Ok(MembershipRecord {
            holder_address,
            group_id,
            display_name: non_empty(self.name).unwrap_or_else(|| UNKNOWN_CHARACTER.to_string()),
            portrait_url: non_empty(self.portrait_url).unwrap_or_else(|| DEFAULT_PORTRAIT_URL.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TribeResponse {
    id: Option<u64>,
    name: Option<String>,
    #[serde(default)]
    members: Vec<TribeMemberResponse>,
}

#[derive(Debug, Deserialize)]
struct TribeMemberResponse {
    name: Option<String>,
    address: String,
}

impl TribeResponse {
    fn into_roster(self, requested: u64) -> TribeRoster {
        let members = self
            .members
            .into_iter()
            .filter_map(|m| match Address::parse(&m.address) {
                Ok(address) => Some(TribeMember {
                    name: non_empty(m.name).unwrap_or_else(|| UNKNOWN_CHARACTER.to_string()),
                    address,
                }),
                Err(e) => {
                    warn!("Skipping tribe member: {}", e);
                    None
                }
            })
            .collect();

        TribeRoster {
            id: self.id.unwrap_or(requested),
            name: self.name.unwrap_or_default(),
            members,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
