//! Channel registry: client id <-> Discord ticket channel id, kept as a bijection.
//!
//! Outbound: a client's message goes to its bound channel (created lazily by the relay).
//! Inbound: a message in a ticket channel is routed back to the bound client.
//! Channel creation is serialized per client through [`ChannelRegistry::lock_client`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Discord user id of the website visitor.
pub type ClientId = String;

/// Discord channel id (snowflake).
pub type ChannelId = u64;

#[derive(Default)]
struct Bindings {
    to_channel: HashMap<ClientId, ChannelId>,
    to_client: HashMap<ChannelId, ClientId>,
}

/// Bidirectional client <-> channel map. Both halves live under one lock so they never disagree.
pub struct ChannelRegistry {
    bindings: RwLock<Bindings>,
    /// Per-client creation locks. tokio's Mutex is fair, so waiters run in arrival order.
    client_locks: StdMutex<HashMap<ClientId, Arc<Mutex<()>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(Bindings::default()),
            client_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Bind client to channel. Drops any previous binding of either side.
    pub async fn bind(&self, client_id: impl Into<ClientId>, channel_id: ChannelId) {
        let client_id = client_id.into();
        let mut g = self.bindings.write().await;
        if let Some(old_channel) = g.to_channel.get(&client_id).copied() {
            g.to_client.remove(&old_channel);
        }
        if let Some(old_client) = g.to_client.insert(channel_id, client_id.clone()) {
            g.to_channel.remove(&old_client);
        }
        g.to_channel.insert(client_id, channel_id);
    }

    /// Channel bound to the client (outbound).
    pub async fn channel_for(&self, client_id: &str) -> Option<ChannelId> {
        self.bindings.read().await.to_channel.get(client_id).copied()
    }

    /// Client bound to the channel (inbound).
    pub async fn client_for(&self, channel_id: ChannelId) -> Option<ClientId> {
        self.bindings.read().await.to_client.get(&channel_id).cloned()
    }

    /// Remove the client's binding. Returns the channel it was bound to.
    pub async fn unbind_client(&self, client_id: &str) -> Option<ChannelId> {
        let mut g = self.bindings.write().await;
        let channel = g.to_channel.remove(client_id)?;
        g.to_client.remove(&channel);
        Some(channel)
    }

    /// Remove the channel's binding. Returns the client it was bound to; `None` when already unbound.
    pub async fn unbind_channel(&self, channel_id: ChannelId) -> Option<ClientId> {
        let mut g = self.bindings.write().await;
        let client = g.to_client.remove(&channel_id)?;
        g.to_channel.remove(&client);
        Some(client)
    }

    pub async fn len(&self) -> usize {
        self.bindings.read().await.to_channel.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Acquire the client's creation lock. Held across resolve/create so one client never gets two channels.
    pub async fn lock_client(&self, client_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .client_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(client_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the client's lock entry when nobody holds or waits on it.
    pub fn forget_client_lock(&self, client_id: &str) {
        let mut locks = self
            .client_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(client_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(client_id);
        }
    }
}
