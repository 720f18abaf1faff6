//! Cloud provider access
//!
//! - `ProviderApi`: listing servers and issuing shutdowns for one credential
//! - `HetznerClient`: REST implementation over reqwest
//! - `collect_snapshots`: merges listings across every configured credential

mod hetzner;

pub use hetzner::HetznerClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// API token for one provider project. Never printed in full.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProviderCredential(Arc<str>);

impl ProviderCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First four characters followed by an ellipsis
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderCredential").field(&self.masked()).finish()
    }
}

impl fmt::Display for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// One server's raw traffic counters as fetched this cycle
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub outgoing_bytes: u64,
    pub included_bytes: u64,
    pub credential: ProviderCredential,
}

/// Server entry as returned by the listing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RawServer {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_bytes")]
    pub outgoing_traffic: u64,
    #[serde(default, deserialize_with = "lenient_bytes")]
    pub included_traffic: u64,
}

impl RawServer {
    pub fn into_snapshot(self, credential: ProviderCredential) -> ServerSnapshot {
        ServerSnapshot {
            id: self.id,
            name: self.name,
            status: self.status,
            outgoing_bytes: self.outgoing_traffic,
            included_bytes: self.included_traffic,
            credential,
        }
    }
}

/// Accepts numbers, numeric strings and null; anything malformed counts as zero
fn lenient_bytes<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_byte_count(&value))
}

pub(crate) fn parse_byte_count(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u64>()
            .ok()
            .or_else(|| {
                s.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .map(|f| f as u64)
            })
            .unwrap_or(0),
        _ => 0,
    }
}

/// Provider operations used by the warden
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn list_servers(&self, credential: &ProviderCredential) -> Result<Vec<ServerSnapshot>>;

    async fn shutdown(&self, server_id: u64, credential: &ProviderCredential) -> Result<()>;
}

/// Merged result of listing every credential
#[derive(Debug, Default)]
pub struct Listing {
    pub snapshots: Vec<ServerSnapshot>,
    /// Credentials whose listing failed this round
    pub failed: Vec<ProviderCredential>,
}

impl Listing {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Lists every credential in order; a failing credential is logged and skipped
pub async fn collect_snapshots(provider: &dyn ProviderApi, credentials: &[ProviderCredential]) -> Listing {
    let mut listing = Listing::default();

    for credential in credentials {
        match provider.list_servers(credential).await {
            Ok(servers) => {
                debug!(credential = %credential, count = servers.len(), "Fetched servers");
                listing.snapshots.extend(servers);
            }
            Err(e) => {
                warn!(credential = %credential, error = %e, "Skipping credential, server listing failed");
                listing.failed.push(credential.clone());
            }
        }
    }

    listing
}
