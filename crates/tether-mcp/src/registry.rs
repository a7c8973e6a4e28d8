//! Connection registry — at most one live client per server name.
//!
//! Lifecycle operations on the same name are serialized through a
//! per-name lock fetched under a brief map lock, so concurrent
//! start/stop/temporary-connect calls cannot race an entry.

use crate::client::{ClientOptions, McpClient};
use crate::config::ServerEntry;
use crate::error::McpError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Slot {
    client: Option<Arc<McpClient>>,
}

/// One row of [`McpRegistry::snapshot`].
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub running: bool,
    pub capabilities: Option<Value>,
}

/// Process-wide mapping from server name to live client.
///
/// Constructed once at plugin startup and passed to handlers explicitly;
/// `teardown` closes everything on plugin shutdown.
pub struct McpRegistry {
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
    options: ClientOptions,
}

impl McpRegistry {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Fetch or create the per-name lifecycle lock.
    async fn slot(&self, name: &str) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    /// Start a client for `entry`. Fails if one is already running; on
    /// handshake failure nothing is inserted.
    pub async fn start(&self, entry: ServerEntry) -> Result<Arc<McpClient>, McpError> {
        let name = entry.name.clone();
        let slot = self.slot(&name).await;
        let mut slot = slot.lock().await;
        if slot.client.is_some() {
            return Err(McpError::AlreadyRunning { name });
        }

        let client = Arc::new(McpClient::connect(entry, self.options.clone()).await?);
        slot.client = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Stop and remove the named client. Returns whether one was running.
    pub async fn stop(&self, name: &str) -> bool {
        let slot = self.slot(name).await;
        let mut slot = slot.lock().await;
        match slot.client.take() {
            Some(client) => {
                client.close().await;
                true
            }
            None => false,
        }
    }

    /// The live client for `name`, if any.
    pub async fn get(&self, name: &str) -> Option<Arc<McpClient>> {
        let slot = self.slot(name).await;
        let slot = slot.lock().await;
        slot.client.clone()
    }

    /// Run `action` against a client for `name`, starting one only if none
    /// is running and stopping it afterwards iff it was started here.
    ///
    /// The per-name lock is held for the duration, so the borrowed client
    /// cannot be stopped out from under the action.
    pub async fn temporary_connect<F, Fut, T>(
        &self,
        entry: ServerEntry,
        action: F,
    ) -> Result<T, McpError>
    where
        F: FnOnce(Arc<McpClient>) -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        let slot = self.slot(&entry.name).await;
        let slot = slot.lock().await;

        if let Some(client) = slot.client.clone() {
            return action(client).await;
        }

        let client = Arc::new(McpClient::connect(entry, self.options.clone()).await?);
        let result = action(Arc::clone(&client)).await;
        client.close().await;
        result
    }

    /// Names with live clients, with their handshake capabilities.
    pub async fn snapshot(&self) -> Vec<RegistryEntry> {
        let slots = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
                .collect::<Vec<_>>()
        };

        let mut entries = Vec::with_capacity(slots.len());
        for (name, slot) in slots {
            let slot = slot.lock().await;
            let (running, capabilities) = match &slot.client {
                Some(client) => (true, client.capabilities()),
                None => (false, None),
            };
            entries.push(RegistryEntry {
                name,
                running,
                capabilities,
            });
        }
        entries
    }

    /// Whether a client is currently running for `name`.
    pub async fn is_running(&self, name: &str) -> bool {
        self.get(name).await.is_some()
    }

    /// Close every client. Called at plugin shutdown.
    pub async fn teardown(&self) {
        let slots = {
            let mut slots = self.slots.lock().await;
            slots.drain().map(|(_, slot)| slot).collect::<Vec<_>>()
        };
        for slot in slots {
            let mut slot = slot.lock().await;
            if let Some(client) = slot.client.take() {
                client.close().await;
            }
        }
    }
}
