/*!
In-memory cloud provider

Implements `ProviderApi` from a fixed server table per credential. Listing
and shutdown failures can be injected per credential and per server.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use traffic_warden::provider::{ProviderApi, ProviderCredential, ServerSnapshot};
use traffic_warden::{Result, WardenError};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Server entry as the fake provider stores it
#[derive(Debug, Clone)]
pub struct FakeServer {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub outgoing_bytes: u64,
    pub included_bytes: u64,
}

/// Running server with traffic given in GiB
pub fn server(id: u64, name: &str, outgoing_gib: u64, included_gib: u64) -> FakeServer {
    FakeServer {
        id,
        name: name.to_string(),
        status: "running".to_string(),
        outgoing_bytes: outgoing_gib * GIB,
        included_bytes: included_gib * GIB,
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    servers: HashMap<String, Vec<FakeServer>>,
    failing_credentials: HashSet<String>,
    failing_shutdowns: HashSet<u64>,
    list_calls: Vec<String>,
    shutdown_calls: Vec<(u64, String)>,
}

#[derive(Debug, Default)]
pub struct MockProvider {
    state: Mutex<ProviderState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(self, token: &str, server: FakeServer) -> Self {
        self.add_server(token, server);
        self
    }

    pub fn add_server(&self, token: &str, server: FakeServer) {
        self.state
            .lock()
            .servers
            .entry(token.to_string())
            .or_default()
            .push(server);
    }

    /// Replaces the outgoing counter of a server, wherever it is registered
    pub fn set_outgoing(&self, server_id: u64, outgoing_bytes: u64) {
        let mut state = self.state.lock();
        for server in state.servers.values_mut().flatten() {
            if server.id == server_id {
                server.outgoing_bytes = outgoing_bytes;
            }
        }
    }

    /// Removes a server from every credential, as if it was deleted
    pub fn remove_server(&self, server_id: u64) {
        for servers in self.state.lock().servers.values_mut() {
            servers.retain(|s| s.id != server_id);
        }
    }

    pub fn fail_listing(&self, token: &str) {
        self.state.lock().failing_credentials.insert(token.to_string());
    }

    pub fn fail_shutdown(&self, server_id: u64) {
        self.state.lock().failing_shutdowns.insert(server_id);
    }

    pub fn heal_listing(&self, token: &str) {
        self.state.lock().failing_credentials.remove(token);
    }

    pub fn heal_shutdown(&self, server_id: u64) {
        self.state.lock().failing_shutdowns.remove(&server_id);
    }

    /// Shutdown attempts as (server id, credential token)
    pub fn shutdown_calls(&self) -> Vec<(u64, String)> {
        self.state.lock().shutdown_calls.clone()
    }

    pub fn list_calls(&self) -> Vec<String> {
        self.state.lock().list_calls.clone()
    }

    pub fn status_of(&self, server_id: u64) -> Option<String> {
        self.state
            .lock()
            .servers
            .values()
            .flatten()
            .find(|s| s.id == server_id)
            .map(|s| s.status.clone())
    }
}

#[async_trait]
impl ProviderApi for MockProvider {
    async fn list_servers(&self, credential: &ProviderCredential) -> Result<Vec<ServerSnapshot>> {
        let mut state = self.state.lock();
        let token = credential.expose().to_string();
        state.list_calls.push(token.clone());

        if state.failing_credentials.contains(&token) {
            return Err(WardenError::Fetch {
                credential: credential.masked(),
                reason: "401 Unauthorized".into(),
            });
        }

        Ok(state
            .servers
            .get(&token)
            .map(|servers| {
                servers
                    .iter()
                    .map(|s| ServerSnapshot {
                        id: s.id,
                        name: s.name.clone(),
                        status: s.status.clone(),
                        outgoing_bytes: s.outgoing_bytes,
                        included_bytes: s.included_bytes,
                        credential: credential.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn shutdown(&self, server_id: u64, credential: &ProviderCredential) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let token = credential.expose().to_string();
        state.shutdown_calls.push((server_id, token.clone()));

        if state.failing_shutdowns.contains(&server_id) {
            return Err(WardenError::Shutdown {
                server_id,
                reason: "503 Service Unavailable".into(),
            });
        }

        let server = state
            .servers
            .get_mut(&token)
            .and_then(|servers| servers.iter_mut().find(|s| s.id == server_id))
            .ok_or_else(|| WardenError::Shutdown {
                server_id,
                reason: "404 server not found for this credential".into(),
            })?;
        server.status = "off".to_string();
        Ok(())
    }
}
